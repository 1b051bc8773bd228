//! Relay signing keys and the per-key submission queue.
//!
//! All redemption calls broadcast by one key consume that key's
//! account-level sequence counter, so submissions for a key are serialized:
//! the sequence slot is allocated under the key's lock, the submission runs
//! to completion, and only then is the next slot handed out. Independent
//! keys proceed in parallel.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alloy_primitives::Address;
use k256::ecdsa::SigningKey;
use tokio::sync::Mutex;

use crate::authorization::{signer_address, signing_key_from_hex};
use crate::error::{AppResult, RelayError};
use crate::token::TxHash;

pub struct RelaySigner {
    key: SigningKey,
    address: Address,
    sequence: Mutex<u64>,
}

impl RelaySigner {
    pub fn new(key: SigningKey) -> Self {
        let address = signer_address(&key);
        Self {
            key,
            address,
            sequence: Mutex::new(0),
        }
    }

    pub fn from_hex(raw: &str) -> AppResult<Self> {
        Ok(Self::new(signing_key_from_hex(raw)?))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }

    /// Run one submission under this key's sequence lock. The sequence
    /// advances only when the submission succeeds — a failed submission
    /// never consumed its slot, and the batch it belonged to aborts.
    pub async fn submit<F, Fut>(&self, submit: F) -> AppResult<TxHash>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = AppResult<TxHash>>,
    {
        let mut sequence = self.sequence.lock().await;
        let hash = submit(*sequence).await?;
        *sequence += 1;
        Ok(hash)
    }

    pub async fn current_sequence(&self) -> u64 {
        *self.sequence.lock().await
    }
}

/// Round-robin pool of relay signers. One batch sticks to one signer;
/// concurrent batches spread across the pool for throughput.
pub struct SignerPool {
    signers: Vec<Arc<RelaySigner>>,
    next: AtomicUsize,
}

impl SignerPool {
    pub fn new(signers: Vec<Arc<RelaySigner>>) -> Self {
        Self {
            signers,
            next: AtomicUsize::new(0),
        }
    }

    pub fn from_hex_keys(keys: &[String]) -> AppResult<Self> {
        let signers = keys
            .iter()
            .map(|raw| RelaySigner::from_hex(raw).map(Arc::new))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self::new(signers))
    }

    pub fn checkout(&self) -> AppResult<Arc<RelaySigner>> {
        if self.signers.is_empty() {
            return Err(RelayError::NoSigners.into());
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.signers.len();
        Ok(self.signers[index].clone())
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.signers.iter().map(|s| s.address()).collect()
    }

    pub fn signers(&self) -> &[Arc<RelaySigner>] {
        &self.signers
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }
}
