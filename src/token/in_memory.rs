//! Reference in-memory settlement token with the EIP-3009 redemption
//! semantics the relay depends on: domain-separated signature verification,
//! inclusive validity windows, and single-use per-authorizer nonces.

use std::collections::{HashMap, HashSet};

use alloy_primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::authorization::{authorization_digest, recover_signer, Authorization, TypedDomain};
use crate::error::{AppResult, TokenError};

use super::{TokenGateway, TxHash};

#[derive(Default)]
struct TokenState {
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    used_nonces: HashSet<(Address, B256)>,
}

pub struct InMemoryToken {
    domain: TypedDomain,
    state: RwLock<TokenState>,
}

impl InMemoryToken {
    pub fn new(domain: TypedDomain) -> Self {
        Self {
            domain,
            state: RwLock::new(TokenState::default()),
        }
    }

    /// Credit an account. Dev seeding and tests only; a deployed token has
    /// its own issuance rules.
    pub fn mint(&self, account: Address, value: U256) {
        let mut state = self.state.write();
        let balance = state.balances.entry(account).or_default();
        *balance = balance.saturating_add(value);
    }

    fn redeem_authorization(&self, auth: &Authorization) -> Result<(), TokenError> {
        let payload = &auth.payload;
        let now = Utc::now().timestamp() as u64;

        if now < payload.valid_after {
            return Err(TokenError::AuthorizationNotYetValid {
                valid_after: payload.valid_after,
                now,
            });
        }
        if now > payload.valid_before {
            return Err(TokenError::AuthorizationExpired {
                valid_before: payload.valid_before,
                now,
            });
        }

        let digest = authorization_digest(&self.domain, payload);
        let signer = recover_signer(digest, auth.v, auth.r, auth.s)?;
        if signer != payload.from {
            return Err(TokenError::InvalidSignature(format!(
                "recovered {} but authorization is from {}",
                signer, payload.from
            )));
        }

        let mut state = self.state.write();

        if state.used_nonces.contains(&(payload.from, payload.nonce)) {
            return Err(TokenError::AuthorizationReused(payload.nonce));
        }

        let balance = state.balances.get(&payload.from).copied().unwrap_or_default();
        if balance < payload.value {
            return Err(TokenError::InsufficientBalance {
                required: payload.value.to_string(),
                available: balance.to_string(),
            });
        }

        state.used_nonces.insert((payload.from, payload.nonce));
        state.balances.insert(payload.from, balance - payload.value);
        let credited = state.balances.entry(payload.to).or_default();
        *credited = credited.saturating_add(payload.value);

        debug!(
            "💸 Redeemed authorization: {} -> {} ({})",
            payload.from, payload.to, payload.value
        );
        Ok(())
    }
}

#[async_trait]
impl TokenGateway for InMemoryToken {
    fn domain(&self) -> TypedDomain {
        self.domain.clone()
    }

    async fn balance_of(&self, account: Address) -> AppResult<U256> {
        Ok(self.state.read().balances.get(&account).copied().unwrap_or_default())
    }

    async fn allowance(&self, owner: Address, spender: Address) -> AppResult<U256> {
        Ok(self
            .state
            .read()
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn approve(&self, owner: Address, spender: Address, value: U256) -> AppResult<()> {
        self.state.write().allowances.insert((owner, spender), value);
        Ok(())
    }

    async fn transfer_from_batch(
        &self,
        spender: Address,
        owner: Address,
        recipients: &[Address],
        amounts: &[U256],
    ) -> AppResult<()> {
        let mut total = U256::ZERO;
        for amount in amounts {
            total = total
                .checked_add(*amount)
                .ok_or(crate::error::LedgerError::AmountOverflow)?;
        }

        // One lock span: check both preconditions, then apply every leg
        let mut state = self.state.write();

        let allowance = state.allowances.get(&(owner, spender)).copied().unwrap_or_default();
        if allowance < total {
            return Err(TokenError::InsufficientAllowance {
                required: total.to_string(),
                available: allowance.to_string(),
            }
            .into());
        }

        let balance = state.balances.get(&owner).copied().unwrap_or_default();
        if balance < total {
            return Err(TokenError::InsufficientBalance {
                required: total.to_string(),
                available: balance.to_string(),
            }
            .into());
        }

        state.allowances.insert((owner, spender), allowance - total);
        state.balances.insert(owner, balance - total);
        for (recipient, amount) in recipients.iter().zip(amounts) {
            let credited = state.balances.entry(*recipient).or_default();
            *credited = credited.saturating_add(*amount);
        }

        Ok(())
    }

    async fn submit_transfer_with_authorization(
        &self,
        relayer: Address,
        sequence: u64,
        authorization: &Authorization,
    ) -> AppResult<TxHash> {
        self.redeem_authorization(authorization)?;

        // Deterministic hash over the submission identity: relayer account,
        // its sequence slot, and the authorization nonce
        let mut preimage = Vec::with_capacity(20 + 8 + 32);
        preimage.extend_from_slice(relayer.as_slice());
        preimage.extend_from_slice(&sequence.to_be_bytes());
        preimage.extend_from_slice(authorization.payload.nonce.as_slice());
        Ok(keccak256(&preimage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::{create_authorization, signer_address};
    use crate::error::AppError;
    use k256::ecdsa::SigningKey;

    fn domain() -> TypedDomain {
        TypedDomain {
            name: "USDT0".to_string(),
            version: "1".to_string(),
            chain_id: 114,
            verifying_contract: Address::repeat_byte(0x42),
        }
    }

    fn signer() -> SigningKey {
        SigningKey::from_slice(&[0x23; 32]).unwrap()
    }

    #[tokio::test]
    async fn redeems_a_valid_authorization_once() {
        let token = InMemoryToken::new(domain());
        let key = signer();
        let from = signer_address(&key);
        let to = Address::repeat_byte(0x77);
        token.mint(from, U256::from(500u64));

        let auth = create_authorization(&key, &domain(), to, U256::from(300u64), 3600);

        let hash = token
            .submit_transfer_with_authorization(Address::repeat_byte(0x01), 0, &auth)
            .await
            .unwrap();
        assert_ne!(hash, TxHash::ZERO);
        assert_eq!(token.balance_of(from).await.unwrap(), U256::from(200u64));
        assert_eq!(token.balance_of(to).await.unwrap(), U256::from(300u64));

        // Replaying the same nonce is rejected and moves nothing
        let err = token
            .submit_transfer_with_authorization(Address::repeat_byte(0x01), 1, &auth)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Token(TokenError::AuthorizationReused(_))
        ));
        assert_eq!(token.balance_of(to).await.unwrap(), U256::from(300u64));
    }

    #[tokio::test]
    async fn rejects_a_signature_from_the_wrong_key() {
        let token = InMemoryToken::new(domain());
        let key = signer();
        let other = SigningKey::from_slice(&[0x24; 32]).unwrap();
        token.mint(signer_address(&key), U256::from(100u64));

        let mut auth =
            create_authorization(&other, &domain(), Address::repeat_byte(0x77), U256::from(10u64), 3600);
        // Claim the funds came from the funded account
        auth.payload.from = signer_address(&key);

        let err = token
            .submit_transfer_with_authorization(Address::repeat_byte(0x01), 0, &auth)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Token(TokenError::InvalidSignature(_))));
    }

    #[tokio::test]
    async fn rejects_an_expired_authorization() {
        let token = InMemoryToken::new(domain());
        let key = signer();
        token.mint(signer_address(&key), U256::from(100u64));

        let mut auth =
            create_authorization(&key, &domain(), Address::repeat_byte(0x77), U256::from(10u64), 3600);
        auth.payload.valid_before = 1;
        auth.payload.valid_after = 0;

        let err = token
            .submit_transfer_with_authorization(Address::repeat_byte(0x01), 0, &auth)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Token(TokenError::AuthorizationExpired { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_redemption_beyond_the_balance() {
        let token = InMemoryToken::new(domain());
        let key = signer();
        token.mint(signer_address(&key), U256::from(50u64));

        let auth =
            create_authorization(&key, &domain(), Address::repeat_byte(0x77), U256::from(60u64), 3600);

        let err = token
            .submit_transfer_with_authorization(Address::repeat_byte(0x01), 0, &auth)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Token(TokenError::InsufficientBalance { .. })
        ));
    }

    #[tokio::test]
    async fn batch_transfer_is_all_or_nothing() {
        let token = InMemoryToken::new(domain());
        let owner = Address::repeat_byte(0x0a);
        let spender = Address::repeat_byte(0x0b);
        let recipients = [Address::repeat_byte(0x01), Address::repeat_byte(0x02)];
        let amounts = [U256::from(100u64), U256::from(200u64)];

        token.mint(owner, U256::from(1_000u64));
        token.approve(owner, spender, U256::from(250u64)).await.unwrap();

        // Allowance 250 < 300: nothing moves
        let err = token
            .transfer_from_batch(spender, owner, &recipients, &amounts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Token(TokenError::InsufficientAllowance { .. })
        ));
        assert_eq!(token.balance_of(owner).await.unwrap(), U256::from(1_000u64));
        assert_eq!(token.balance_of(recipients[0]).await.unwrap(), U256::ZERO);

        token.approve(owner, spender, U256::from(300u64)).await.unwrap();
        token
            .transfer_from_batch(spender, owner, &recipients, &amounts)
            .await
            .unwrap();

        assert_eq!(token.balance_of(owner).await.unwrap(), U256::from(700u64));
        assert_eq!(token.balance_of(recipients[0]).await.unwrap(), U256::from(100u64));
        assert_eq!(token.balance_of(recipients[1]).await.unwrap(), U256::from(200u64));
        assert_eq!(token.allowance(owner, spender).await.unwrap(), U256::ZERO);
    }
}
