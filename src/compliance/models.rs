use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Receipt lifecycle: created `pending`, transitions asynchronously to
/// `anchored` (success) or `failed`. Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Pending,
    Anchored,
    Failed,
}

impl ReceiptStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReceiptStatus::Anchored | ReceiptStatus::Failed)
    }

    /// The only legal transitions are pending → anchored and
    /// pending → failed. Anything observed after a terminal status is a
    /// no-op for the observer.
    pub fn can_transition_to(&self, next: ReceiptStatus) -> bool {
        matches!(
            (self, next),
            (ReceiptStatus::Pending, ReceiptStatus::Anchored)
                | (ReceiptStatus::Pending, ReceiptStatus::Failed)
        )
    }
}

/// An attestation receipt as served by the compliance service. Owned by the
/// external service; this side only caches the last known state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: String,
    pub status: ReceiptStatus,
    pub tx_hash: String,
    pub chain: String,
    pub amount: String,
    pub currency: String,
    pub reference: String,
    pub sender_wallet: String,
    pub receiver_wallet: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_tx_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_url: Option<String>,
}

/// Attestation submission for one settled transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTipRequest {
    pub tx_hash: String,
    pub chain: String,
    pub amount: String,
    pub currency: String,
    pub sender_wallet: String,
    pub receiver_wallet: String,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTipResponse {
    pub receipt_id: String,
    pub status: ReceiptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyBundleRequest {
    pub bundle_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyBundleResponse {
    pub matches_onchain: bool,
    pub verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_transitions() {
        use ReceiptStatus::*;

        assert!(Pending.can_transition_to(Anchored));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Anchored.can_transition_to(Pending));
        assert!(!Anchored.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Anchored));

        assert!(!Pending.is_terminal());
        assert!(Anchored.is_terminal());
        assert!(Failed.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ReceiptStatus::Anchored).unwrap(),
            "\"anchored\""
        );
        let status: ReceiptStatus = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(status, ReceiptStatus::Pending);
    }
}
