//! Asynchronous reconciliation of settled batches with the compliance
//! service. Anchoring is best-effort and additive: a submission failure is
//! logged and skipped, never escalated to a settlement failure.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info};

use crate::ledger::BatchPayoutLedger;
use crate::relay::BatchRelayOutcome;
use crate::token::units::format_token_amount;

use super::client::ComplianceClient;
use super::models::{RecordTipRequest, RecordTipResponse};

pub struct ComplianceReconciler {
    client: ComplianceClient,
    ledger: Arc<BatchPayoutLedger>,
    chain: String,
    currency: String,
}

impl ComplianceReconciler {
    pub fn new(
        client: ComplianceClient,
        ledger: Arc<BatchPayoutLedger>,
        chain: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            client,
            ledger,
            chain: chain.into(),
            currency: currency.into(),
        }
    }

    /// Submit one attestation per settled recipient. Submissions run
    /// concurrently with no ordering guarantee; per-recipient failures do
    /// not block the others. The first successful receipt id (by recipient
    /// index) becomes the payout's primary compliance receipt.
    pub async fn submit_batch(
        &self,
        outcome: &BatchRelayOutcome,
        payout_ref: &str,
    ) -> Vec<Option<RecordTipResponse>> {
        let submissions = outcome.recipients.iter().enumerate().map(|(index, recipient)| {
            let request = RecordTipRequest {
                tx_hash: outcome.transaction_hashes[index].to_string(),
                chain: self.chain.clone(),
                amount: format_token_amount(outcome.amounts[index])
                    .unwrap_or_else(|_| outcome.amounts[index].to_string()),
                currency: self.currency.clone(),
                sender_wallet: outcome.initiator.to_string(),
                receiver_wallet: recipient.to_string(),
                reference: format!("{}:recipient:{}", payout_ref, index),
                callback_url: None,
            };

            async move {
                match self.client.record_tip(&request).await {
                    Ok(response) => {
                        info!(
                            "🧾 Receipt {} created for recipient {} of batch {}",
                            response.receipt_id, index, outcome.batch_id
                        );
                        Some(response)
                    }
                    Err(e) => {
                        error!(
                            "Failed to record compliance receipt for recipient {} of batch {}: {}",
                            index, outcome.batch_id, e
                        );
                        None
                    }
                }
            }
        });

        let results: Vec<Option<RecordTipResponse>> = join_all(submissions).await;

        if let Some(payout_id) = outcome.payout_id {
            if let Some(first) = results.iter().flatten().next() {
                match self
                    .ledger
                    .attach_compliance_receipt(payout_id, &first.receipt_id)
                    .await
                {
                    Ok(true) => {
                        info!(
                            "🔗 Payout {} anchored to receipt {}",
                            payout_id, first.receipt_id
                        );
                    }
                    Ok(false) => {
                        // A receipt was already attached; later ones are
                        // informational only
                    }
                    Err(e) => error!(
                        "Failed to attach receipt {} to payout {}: {}",
                        first.receipt_id, payout_id, e
                    ),
                }
            }
        }

        results
    }
}
