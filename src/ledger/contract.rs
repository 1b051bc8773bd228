//! The settlement ledger: the contract of record for payouts and recipient
//! payments. Every entrypoint is transactional — a precondition violation
//! rejects the whole call and no caller ever observes partial state.

use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use crate::error::{AppResult, LedgerError};
use crate::token::TokenGateway;

use super::models::{Payout, PayoutCreated, RecipientPayment};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Recording seam between the relay and the ledger. The relay only needs the
/// record-only entrypoint, and tests exercise its failure handling through
/// this trait.
#[async_trait]
pub trait SettlementRecorder: Send + Sync {
    /// Record a batch whose transfers were already executed via redeemed
    /// authorizations. Creates the Payout and RecipientPayments without
    /// moving funds.
    async fn record_batch_payout(
        &self,
        initiator: Address,
        recipients: &[Address],
        amounts: &[U256],
        nonces: &[B256],
        reference: &str,
    ) -> AppResult<u64>;
}

#[derive(Default)]
struct LedgerState {
    payouts: Vec<Payout>,
    recipient_payments: Vec<Vec<RecipientPayment>>,
}

pub struct BatchPayoutLedger {
    /// The ledger's own address; direct-mode callers grant allowance to it
    address: Address,
    token: Arc<dyn TokenGateway>,
    state: RwLock<LedgerState>,
    events: broadcast::Sender<PayoutCreated>,
}

fn check_batch_arrays(recipients: usize, amounts: usize) -> Result<(), LedgerError> {
    if recipients != amounts {
        return Err(LedgerError::ArrayLengthMismatch { recipients, amounts });
    }
    if recipients == 0 {
        return Err(LedgerError::EmptyBatch);
    }
    Ok(())
}

fn batch_total(amounts: &[U256]) -> Result<U256, LedgerError> {
    let mut total = U256::ZERO;
    for amount in amounts {
        total = total
            .checked_add(*amount)
            .ok_or(LedgerError::AmountOverflow)?;
    }
    Ok(total)
}

impl BatchPayoutLedger {
    pub fn new(address: Address, token: Arc<dyn TokenGateway>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            address,
            token,
            state: RwLock::new(LedgerState::default()),
            events,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Subscribe to `PayoutCreated` events
    pub fn subscribe(&self) -> broadcast::Receiver<PayoutCreated> {
        self.events.subscribe()
    }

    /// Direct mode: pull `sum(amounts)` from the caller (against its
    /// allowance to the ledger), distribute to each recipient, and create
    /// the payout record — all or nothing.
    pub async fn batch_payout(
        &self,
        caller: Address,
        recipients: &[Address],
        amounts: &[U256],
        reference: &str,
    ) -> AppResult<u64> {
        check_batch_arrays(recipients.len(), amounts.len())?;
        let total = batch_total(amounts)?;

        // Write lock held across the whole entrypoint: this is the
        // transaction boundary
        let mut state = self.state.write().await;

        let allowance = self.token.allowance(caller, self.address).await?;
        if allowance < total {
            return Err(LedgerError::InsufficientAllowance {
                required: total.to_string(),
                available: allowance.to_string(),
            }
            .into());
        }

        self.token
            .transfer_from_batch(self.address, caller, recipients, amounts)
            .await?;

        let payout_id = Self::insert_payout(&mut state, caller, recipients, amounts, total);
        self.emit_created(&state, payout_id, reference, Vec::new());

        info!(
            "📒 Payout {} created: {} recipients, total {} ({})",
            payout_id,
            recipients.len(),
            total,
            reference
        );
        Ok(payout_id)
    }

    fn insert_payout(
        state: &mut LedgerState,
        initiator: Address,
        recipients: &[Address],
        amounts: &[U256],
        total: U256,
    ) -> u64 {
        let payout_id = state.payouts.len() as u64 + 1;
        let timestamp = Utc::now();

        state.payouts.push(Payout {
            payout_id,
            initiator,
            total_amount: total,
            recipient_count: recipients.len() as u64,
            timestamp,
            completed: true,
            compliance_receipt_id: None,
        });
        state.recipient_payments.push(
            recipients
                .iter()
                .zip(amounts)
                .map(|(recipient, amount)| RecipientPayment {
                    payout_id,
                    recipient: *recipient,
                    amount: *amount,
                    paid: true,
                    timestamp,
                })
                .collect(),
        );

        payout_id
    }

    fn emit_created(
        &self,
        state: &LedgerState,
        payout_id: u64,
        reference: &str,
        settlement_nonces: Vec<B256>,
    ) {
        let payout = &state.payouts[(payout_id - 1) as usize];
        let _ = self.events.send(PayoutCreated {
            payout_id,
            initiator: payout.initiator,
            total_amount: payout.total_amount,
            recipient_count: payout.recipient_count,
            reference: reference.to_string(),
            settlement_nonces,
        });
    }

    pub async fn payout_count(&self) -> u64 {
        self.state.read().await.payouts.len() as u64
    }

    pub async fn payout(&self, payout_id: u64) -> AppResult<Payout> {
        let state = self.state.read().await;
        payout_index(&state, payout_id).map(|i| state.payouts[i].clone())
    }

    pub async fn payout_recipients(&self, payout_id: u64) -> AppResult<Vec<RecipientPayment>> {
        let state = self.state.read().await;
        payout_index(&state, payout_id).map(|i| state.recipient_payments[i].clone())
    }

    /// Every payment ever made to `recipient`, in payout order
    pub async fn recipient_history(&self, recipient: Address) -> Vec<RecipientPayment> {
        let state = self.state.read().await;
        state
            .recipient_payments
            .iter()
            .flatten()
            .filter(|payment| payment.recipient == recipient)
            .cloned()
            .collect()
    }

    pub async fn all_payouts(&self) -> Vec<Payout> {
        self.state.read().await.payouts.clone()
    }

    /// Attach the primary compliance receipt id. Set at most once — the
    /// first successful receipt wins and later calls return `false`.
    pub async fn attach_compliance_receipt(
        &self,
        payout_id: u64,
        receipt_id: &str,
    ) -> AppResult<bool> {
        let mut state = self.state.write().await;
        let index = payout_index(&state, payout_id)?;
        let payout = &mut state.payouts[index];

        if payout.compliance_receipt_id.is_some() {
            return Ok(false);
        }
        payout.compliance_receipt_id = Some(receipt_id.to_string());
        Ok(true)
    }
}

fn payout_index(state: &LedgerState, payout_id: u64) -> AppResult<usize> {
    if payout_id == 0 || payout_id > state.payouts.len() as u64 {
        return Err(LedgerError::PayoutNotFound(payout_id).into());
    }
    Ok((payout_id - 1) as usize)
}

#[async_trait]
impl SettlementRecorder for BatchPayoutLedger {
    async fn record_batch_payout(
        &self,
        initiator: Address,
        recipients: &[Address],
        amounts: &[U256],
        nonces: &[B256],
        reference: &str,
    ) -> AppResult<u64> {
        check_batch_arrays(recipients.len(), amounts.len())?;
        if nonces.len() != recipients.len() {
            return Err(LedgerError::NonceCountMismatch {
                recipients: recipients.len(),
                nonces: nonces.len(),
            }
            .into());
        }
        let total = batch_total(amounts)?;

        let mut state = self.state.write().await;
        let payout_id = Self::insert_payout(&mut state, initiator, recipients, amounts, total);
        self.emit_created(&state, payout_id, reference, nonces.to_vec());

        info!(
            "📒 Recorded settled payout {}: {} recipients, total {} ({})",
            payout_id,
            recipients.len(),
            total,
            reference
        );
        Ok(payout_id)
    }
}
