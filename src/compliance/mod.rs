pub mod client;
pub mod models;
pub mod reconciler;
pub mod subscription;

pub use client::ComplianceClient;
pub use models::{Receipt, ReceiptStatus, RecordTipRequest, RecordTipResponse};
pub use reconciler::ComplianceReconciler;
pub use subscription::ReceiptSubscription;
