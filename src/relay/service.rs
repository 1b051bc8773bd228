//! The relay service: redeems third-party-signed transfer authorizations on
//! behalf of initiators who hold no network-fee currency, then records the
//! settled batch on the settlement ledger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::authorization::{u256_dec, validate_batch_shape, Authorization};
use crate::error::{AbortCause, AppResult, RelayError};
use crate::ledger::SettlementRecorder;
use crate::relay::{RelaySigner, SignerPool};
use crate::token::{TokenGateway, TxHash};

/// One successfully redeemed authorization, reported back even when a later
/// step fails — funds have moved.
#[derive(Debug, Clone, Serialize)]
pub struct SettledTransfer {
    pub index: usize,
    pub recipient: Address,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    pub tx_hash: TxHash,
}

/// Result of a fully redeemed batch. `recorded = false` is the distinct
/// "unrecorded" terminal state: every transfer succeeded but the ledger
/// record could not be written; resolution is manual reconciliation.
#[derive(Debug, Clone)]
pub struct BatchRelayOutcome {
    pub batch_id: Uuid,
    pub initiator: Address,
    pub payout_id: Option<u64>,
    pub recorded: bool,
    pub transaction_hashes: Vec<TxHash>,
    pub recipients: Vec<Address>,
    pub amounts: Vec<U256>,
}

/// Cancellation handle for a pending batch. Honored only before the first
/// redemption; once any authorization has been redeemed the batch runs to
/// completion because there is no compensating rollback of transfers.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct RelayService {
    token: Arc<dyn TokenGateway>,
    recorder: Arc<dyn SettlementRecorder>,
    signers: SignerPool,
    submission_margin_secs: u64,
}

impl RelayService {
    pub fn new(
        token: Arc<dyn TokenGateway>,
        recorder: Arc<dyn SettlementRecorder>,
        signers: SignerPool,
        submission_margin_secs: u64,
    ) -> Self {
        Self {
            token,
            recorder,
            signers,
            submission_margin_secs,
        }
    }

    pub fn signer_addresses(&self) -> Vec<Address> {
        self.signers.addresses()
    }

    /// Execute a batch of authorizations as one logical payout.
    ///
    /// Shape violations reject before any chain interaction. Validity
    /// windows are re-checked immediately before each submission (time moves
    /// during a batch); the first failure aborts the remaining
    /// authorizations and the error reports which indices settled.
    pub async fn relay_batch(
        &self,
        authorizations: &[Authorization],
        payout_ref: &str,
        cancel: Option<&CancelHandle>,
    ) -> AppResult<BatchRelayOutcome> {
        let initiator = validate_batch_shape(authorizations)?;
        let signer = self.signers.checkout()?;
        let batch_id = Uuid::new_v4();

        info!(
            "🚚 Relaying batch {}: {} authorizations from {} via signer {} ({})",
            batch_id,
            authorizations.len(),
            initiator,
            signer.address(),
            payout_ref
        );

        let mut settled: Vec<SettledTransfer> = Vec::with_capacity(authorizations.len());

        for (index, authorization) in authorizations.iter().enumerate() {
            if settled.is_empty() {
                if let Some(cancel) = cancel {
                    if cancel.is_cancelled() {
                        info!("🛑 Batch {} cancelled before the first redemption", batch_id);
                        return Err(RelayError::Cancelled.into());
                    }
                }
            }

            let now = Utc::now().timestamp() as u64;
            if let Err(window) = authorization
                .payload
                .check_submission_window(now, self.submission_margin_secs)
            {
                return Err(self.abort(batch_id, index, AbortCause::Window(window), settled));
            }

            let hash = self
                .redeem(&signer, authorization)
                .await
                .map_err(|error| {
                    // Token reverts (nonce reuse included) are terminal for
                    // the batch; the relay never retries a submission blindly
                    self.abort(
                        batch_id,
                        index,
                        AbortCause::Submission(error.to_string()),
                        std::mem::take(&mut settled),
                    )
                })?;

            settled.push(SettledTransfer {
                index,
                recipient: authorization.payload.to,
                amount: authorization.payload.value,
                tx_hash: hash,
            });
        }

        let recipients: Vec<Address> = authorizations.iter().map(|a| a.payload.to).collect();
        let amounts: Vec<U256> = authorizations.iter().map(|a| a.payload.value).collect();
        let nonces: Vec<B256> = authorizations.iter().map(|a| a.payload.nonce).collect();
        let transaction_hashes: Vec<TxHash> = settled.iter().map(|t| t.tx_hash).collect();

        // Recording failure is never conflated with transfer failure: funds
        // have moved, so the batch is reported settled-but-unrecorded.
        let (payout_id, recorded) = match self
            .recorder
            .record_batch_payout(initiator, &recipients, &amounts, &nonces, payout_ref)
            .await
        {
            Ok(payout_id) => (Some(payout_id), true),
            Err(error) => {
                warn!(
                    "⚠️ Batch {} settled but unrecorded: ledger rejected the record: {}",
                    batch_id, error
                );
                (None, false)
            }
        };

        info!(
            "✓ Batch {} settled: {} transfers, payout {:?}",
            batch_id,
            transaction_hashes.len(),
            payout_id
        );

        Ok(BatchRelayOutcome {
            batch_id,
            initiator,
            payout_id,
            recorded,
            transaction_hashes,
            recipients,
            amounts,
        })
    }

    async fn redeem(
        &self,
        signer: &Arc<RelaySigner>,
        authorization: &Authorization,
    ) -> AppResult<TxHash> {
        let relayer = signer.address();
        signer
            .submit(|sequence| {
                self.token
                    .submit_transfer_with_authorization(relayer, sequence, authorization)
            })
            .await
    }

    fn abort(
        &self,
        batch_id: Uuid,
        index: usize,
        cause: AbortCause,
        settled: Vec<SettledTransfer>,
    ) -> crate::error::AppError {
        warn!(
            "✗ Batch {} aborted at authorization {}: {} ({} already settled)",
            batch_id,
            index,
            cause,
            settled.len()
        );
        RelayError::Aborted {
            index,
            cause,
            settled,
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::{
        create_authorization, signer_address, AuthorizationPayload, TypedDomain, WindowError,
    };
    use crate::error::AppError;
    use crate::ledger::BatchPayoutLedger;
    use crate::token::InMemoryToken;
    use async_trait::async_trait;
    use k256::ecdsa::SigningKey;

    fn domain() -> TypedDomain {
        TypedDomain {
            name: "USDT0".to_string(),
            version: "1".to_string(),
            chain_id: 114,
            verifying_contract: alloy_primitives::Address::repeat_byte(0x42),
        }
    }

    fn initiator_key() -> SigningKey {
        SigningKey::from_slice(&[0x51; 32]).unwrap()
    }

    fn pool(bytes: &[u8]) -> SignerPool {
        SignerPool::new(
            bytes
                .iter()
                .map(|b| Arc::new(RelaySigner::new(SigningKey::from_slice(&[*b; 32]).unwrap())))
                .collect(),
        )
    }

    struct FailingRecorder;

    #[async_trait]
    impl SettlementRecorder for FailingRecorder {
        async fn record_batch_payout(
            &self,
            _initiator: Address,
            _recipients: &[Address],
            _amounts: &[U256],
            _nonces: &[B256],
            _reference: &str,
        ) -> AppResult<u64> {
            Err(AppError::ExternalError("ledger unavailable".to_string()))
        }
    }

    fn setup() -> (Arc<InMemoryToken>, Arc<BatchPayoutLedger>, SigningKey) {
        let token = Arc::new(InMemoryToken::new(domain()));
        let ledger = Arc::new(BatchPayoutLedger::new(
            Address::repeat_byte(0x88),
            token.clone(),
        ));
        let key = initiator_key();
        token.mint(signer_address(&key), U256::from(1_000_000u64));
        (token, ledger, key)
    }

    #[tokio::test]
    async fn full_batch_settles_and_records() {
        let (token, ledger, key) = setup();
        let service = RelayService::new(token.clone(), ledger.clone(), pool(&[0x61]), 0);

        let recipients = [Address::repeat_byte(0x01), Address::repeat_byte(0x02)];
        let batch = vec![
            create_authorization(&key, &domain(), recipients[0], U256::from(100u64), 3600),
            create_authorization(&key, &domain(), recipients[1], U256::from(200u64), 3600),
        ];

        let outcome = service.relay_batch(&batch, "ref-1", None).await.unwrap();
        assert!(outcome.recorded);
        assert_eq!(outcome.payout_id, Some(1));
        assert_eq!(outcome.transaction_hashes.len(), 2);
        assert_eq!(outcome.initiator, signer_address(&key));

        assert_eq!(token.balance_of(recipients[0]).await.unwrap(), U256::from(100u64));
        assert_eq!(token.balance_of(recipients[1]).await.unwrap(), U256::from(200u64));
        assert_eq!(ledger.payout_count().await, 1);
    }

    #[tokio::test]
    async fn expired_authorization_aborts_the_remainder() {
        let (token, ledger, key) = setup();
        let service = RelayService::new(token.clone(), ledger.clone(), pool(&[0x61]), 0);

        let recipients = [
            Address::repeat_byte(0x01),
            Address::repeat_byte(0x02),
            Address::repeat_byte(0x03),
        ];
        let now = Utc::now().timestamp() as u64;
        let expired = Authorization {
            payload: AuthorizationPayload {
                from: signer_address(&key),
                to: recipients[1],
                value: U256::from(50u64),
                valid_after: 0,
                valid_before: now - 100,
                nonce: crate::authorization::random_nonce(),
            },
            v: 27,
            r: B256::ZERO,
            s: B256::ZERO,
        };
        let batch = vec![
            create_authorization(&key, &domain(), recipients[0], U256::from(100u64), 3600),
            expired,
            create_authorization(&key, &domain(), recipients[2], U256::from(300u64), 3600),
        ];

        let err = service.relay_batch(&batch, "ref-2", None).await.unwrap_err();
        match err {
            AppError::Relay(RelayError::Aborted {
                index,
                cause: AbortCause::Window(WindowError::Expired { .. }),
                settled,
            }) => {
                assert_eq!(index, 1);
                assert_eq!(settled.len(), 1);
                assert_eq!(settled[0].index, 0);
                assert_eq!(settled[0].recipient, recipients[0]);
            }
            other => panic!("expected window abort, got {:?}", other),
        }

        // #1 settled, #2 rejected, #3 never submitted
        assert_eq!(token.balance_of(recipients[0]).await.unwrap(), U256::from(100u64));
        assert_eq!(token.balance_of(recipients[1]).await.unwrap(), U256::ZERO);
        assert_eq!(token.balance_of(recipients[2]).await.unwrap(), U256::ZERO);
        assert_eq!(ledger.payout_count().await, 0);
    }

    #[tokio::test]
    async fn submission_failure_reports_the_settled_prefix() {
        let (token, ledger, key) = setup();
        let service = RelayService::new(token.clone(), ledger.clone(), pool(&[0x61]), 0);

        // Re-use the first authorization's nonce in the second: the token
        // rejects the replay and the batch aborts without a retry
        let first =
            create_authorization(&key, &domain(), Address::repeat_byte(0x01), U256::from(10u64), 3600);
        let mut second =
            create_authorization(&key, &domain(), Address::repeat_byte(0x02), U256::from(20u64), 3600);
        second.payload.nonce = first.payload.nonce;
        let (v, r, s) =
            crate::authorization::sign_payload(&key, &domain(), &second.payload);
        second.v = v;
        second.r = r;
        second.s = s;

        let err = service
            .relay_batch(&[first, second], "ref-3", None)
            .await
            .unwrap_err();
        match err {
            AppError::Relay(RelayError::Aborted {
                index,
                cause: AbortCause::Submission(_),
                settled,
            }) => {
                assert_eq!(index, 1);
                assert_eq!(settled.len(), 1);
            }
            other => panic!("expected submission abort, got {:?}", other),
        }
        assert_eq!(ledger.payout_count().await, 0);
    }

    #[tokio::test]
    async fn recording_failure_yields_the_unrecorded_state() {
        let (token, _ledger, key) = setup();
        let service = RelayService::new(
            token.clone(),
            Arc::new(FailingRecorder),
            pool(&[0x61]),
            0,
        );

        let recipient = Address::repeat_byte(0x01);
        let batch =
            vec![create_authorization(&key, &domain(), recipient, U256::from(100u64), 3600)];

        let outcome = service.relay_batch(&batch, "ref-4", None).await.unwrap();
        assert!(!outcome.recorded);
        assert_eq!(outcome.payout_id, None);
        assert_eq!(outcome.transaction_hashes.len(), 1);
        // Funds moved even though the record was never written
        assert_eq!(token.balance_of(recipient).await.unwrap(), U256::from(100u64));
    }

    #[tokio::test]
    async fn cancellation_only_applies_before_the_first_redemption() {
        let (token, ledger, key) = setup();
        let service = RelayService::new(token.clone(), ledger.clone(), pool(&[0x61]), 0);

        let recipient = Address::repeat_byte(0x01);
        let batch =
            vec![create_authorization(&key, &domain(), recipient, U256::from(100u64), 3600)];

        let cancel = CancelHandle::new();
        cancel.cancel();
        let err = service
            .relay_batch(&batch, "ref-5", Some(&cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Relay(RelayError::Cancelled)));
        assert_eq!(token.balance_of(recipient).await.unwrap(), U256::ZERO);
    }

    #[tokio::test]
    async fn concurrent_batches_on_one_key_serialize_their_sequences() {
        let (token, ledger, key) = setup();
        let signers = pool(&[0x61]);
        let service = Arc::new(RelayService::new(
            token.clone(),
            ledger.clone(),
            signers,
            0,
        ));

        let batch_a: Vec<_> = (0u8..4)
            .map(|i| {
                create_authorization(
                    &key,
                    &domain(),
                    Address::repeat_byte(0x10 + i),
                    U256::from(1u64),
                    3600,
                )
            })
            .collect();
        let batch_b: Vec<_> = (0u8..4)
            .map(|i| {
                create_authorization(
                    &key,
                    &domain(),
                    Address::repeat_byte(0x20 + i),
                    U256::from(1u64),
                    3600,
                )
            })
            .collect();

        let (a, b) = tokio::join!(
            service.relay_batch(&batch_a, "ref-a", None),
            service.relay_batch(&batch_b, "ref-b", None)
        );
        let a = a.unwrap();
        let b = b.unwrap();

        // Eight submissions, eight distinct sequence slots, no interleaved reuse
        let mut hashes: Vec<_> = a
            .transaction_hashes
            .iter()
            .chain(b.transaction_hashes.iter())
            .collect();
        hashes.sort();
        hashes.dedup();
        assert_eq!(hashes.len(), 8);
        assert_eq!(ledger.payout_count().await, 2);
    }
}
