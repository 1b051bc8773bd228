//! Settlement-token access. The rest of the system talks to the token through
//! the [`TokenGateway`] trait so the relay and ledger cores stay testable
//! without a live network; the gateway is constructed once at bootstrap and
//! passed down as explicit context.

mod in_memory;
pub mod units;

pub use in_memory::InMemoryToken;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::authorization::{Authorization, TypedDomain};
use crate::error::AppResult;

/// Transaction hash assigned to a submitted redemption
pub type TxHash = B256;

/// Gateway to the stable-value settlement token
///
/// INVARIANTS:
/// - `submit_transfer_with_authorization` must enforce the token's own
///   replay protection: a nonce is consumed at most once per authorizer.
/// - `transfer_from_batch` is all-or-nothing; no caller ever observes a
///   partially applied batch.
/// - Submissions for one relayer key must be passed strictly increasing
///   `sequence` numbers; the caller owns sequence allocation.
#[async_trait]
pub trait TokenGateway: Send + Sync {
    /// The EIP-712 domain authorizations for this token are bound to
    fn domain(&self) -> TypedDomain;

    async fn balance_of(&self, account: Address) -> AppResult<U256>;

    async fn allowance(&self, owner: Address, spender: Address) -> AppResult<U256>;

    async fn approve(&self, owner: Address, spender: Address, value: U256) -> AppResult<()>;

    /// Pull `sum(amounts)` from `owner` (spending `spender`'s allowance) and
    /// distribute to `recipients`, atomically.
    async fn transfer_from_batch(
        &self,
        spender: Address,
        owner: Address,
        recipients: &[Address],
        amounts: &[U256],
    ) -> AppResult<()>;

    /// Redeem a signed authorization, moving `value` from `payload.from` to
    /// `payload.to`. Returns the transaction hash of the redemption.
    async fn submit_transfer_with_authorization(
        &self,
        relayer: Address,
        sequence: u64,
        authorization: &Authorization,
    ) -> AppResult<TxHash>;
}
