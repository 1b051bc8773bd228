use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::authorization::Authorization;
use crate::ledger::models::{Payout, RecipientPayment};
use crate::relay::BatchRelayOutcome;
use crate::token::TxHash;

// ========== REQUEST MODELS ==========

/// Batch relay request: signed authorizations plus the payout reference
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRelayRequest {
    pub authorizations: Vec<Authorization>,
    pub payout_ref: String,
}

// ========== RESPONSE MODELS ==========

/// Full-success relay response. `recorded = false` flags the distinct
/// settled-but-unrecorded state: every transfer went through but the ledger
/// record could not be written.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRelayResponse {
    pub success: bool,
    pub payout_id: Option<u64>,
    pub recorded: bool,
    pub transaction_hashes: Vec<TxHash>,
    pub recipients: Vec<Address>,
    /// Smallest-unit amounts as decimal strings
    pub amounts: Vec<String>,
}

impl From<&BatchRelayOutcome> for BatchRelayResponse {
    fn from(outcome: &BatchRelayOutcome) -> Self {
        Self {
            success: true,
            payout_id: outcome.payout_id,
            recorded: outcome.recorded,
            transaction_hashes: outcome.transaction_hashes.clone(),
            recipients: outcome.recipients.clone(),
            amounts: outcome.amounts.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientPaymentResponse {
    pub payout_id: u64,
    pub recipient: Address,
    pub amount: String,
    pub paid: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<RecipientPayment> for RecipientPaymentResponse {
    fn from(payment: RecipientPayment) -> Self {
        Self {
            payout_id: payment.payout_id,
            recipient: payment.recipient,
            amount: payment.amount.to_string(),
            paid: payment.paid,
            timestamp: payment.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutResponse {
    pub payout_id: u64,
    pub initiator: Address,
    pub total_amount: String,
    pub recipient_count: u64,
    pub timestamp: DateTime<Utc>,
    pub completed: bool,
    pub compliance_receipt_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipients: Option<Vec<RecipientPaymentResponse>>,
}

impl PayoutResponse {
    pub fn new(payout: Payout, recipients: Option<Vec<RecipientPayment>>) -> Self {
        Self {
            payout_id: payout.payout_id,
            initiator: payout.initiator,
            total_amount: payout.total_amount.to_string(),
            recipient_count: payout.recipient_count,
            timestamp: payout.timestamp,
            completed: payout.completed,
            compliance_receipt_id: payout.compliance_receipt_id,
            recipients: recipients.map(|r| r.into_iter().map(Into::into).collect()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutListResponse {
    pub count: u64,
    pub payouts: Vec<PayoutResponse>,
}

/// Dashboard statistics over all payouts
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutStatsResponse {
    pub total_payouts: u64,
    /// Human-readable token amount (6 decimals)
    pub total_amount: String,
    pub total_recipients: u64,
    pub pending_payouts: u64,
    pub completed_payouts: u64,
    pub average_payout: String,
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub relayer_addresses: Vec<Address>,
    pub chain_id: u64,
    pub token_address: Address,
    pub timestamp: DateTime<Utc>,
}
