pub mod contract;
pub mod models;

pub use contract::{BatchPayoutLedger, SettlementRecorder};
pub use models::{Payout, PayoutCreated, RecipientPayment};
