use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::authorization::u256_dec;

/// One logical payout: a batch of recipient transfers settled or recorded
/// as a single operation.
///
/// Created exactly once per successful batch submission. Immutable apart
/// from `compliance_receipt_id`, which is attached at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    /// Monotonically increasing, starting at 1
    pub payout_id: u64,
    pub initiator: Address,
    #[serde(with = "u256_dec")]
    pub total_amount: U256,
    pub recipient_count: u64,
    pub timestamp: DateTime<Utc>,
    pub completed: bool,
    pub compliance_receipt_id: Option<String>,
}

/// One recipient's share of a payout. Created atomically with its Payout;
/// immutable afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientPayment {
    pub payout_id: u64,
    pub recipient: Address,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    pub paid: bool,
    pub timestamp: DateTime<Utc>,
}

/// Emitted on every payout creation for indexing. Carries the settlement
/// nonces as the audit trail linking recorded batches back to their
/// redeemed authorizations.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutCreated {
    pub payout_id: u64,
    pub initiator: Address,
    #[serde(with = "u256_dec")]
    pub total_amount: U256,
    pub recipient_count: u64,
    pub reference: String,
    pub settlement_nonces: Vec<B256>,
}
