pub mod service;
pub mod signer;

pub use service::{BatchRelayOutcome, CancelHandle, RelayService, SettledTransfer};
pub use signer::{RelaySigner, SignerPool};
