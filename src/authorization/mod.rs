//! Transfer authorizations: the signed, time-bounded, single-use instructions
//! the relay redeems on behalf of initiators who hold no network-fee currency.

mod typed_data;

pub use typed_data::{
    authorization_digest, domain_separator, recover_signer, sign_payload, signer_address,
    signing_key_from_hex,
};

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::RelayError;

/// Decimal-string (de)serialization for U256 amounts on the wire.
/// The relayer protocol carries `value` as a base-10 string.
pub mod u256_dec {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<U256>().map_err(serde::de::Error::custom)
    }
}

/// EIP-712 domain the settlement token binds authorizations to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

/// The signed message body of a transfer authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPayload {
    pub from: Address,
    pub to: Address,
    #[serde(with = "u256_dec")]
    pub value: U256,
    pub valid_after: u64,
    pub valid_before: u64,
    pub nonce: B256,
}

/// A transfer authorization as it crosses the relay boundary: the typed-data
/// payload plus its recoverable signature split into v/r/s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorization {
    pub payload: AuthorizationPayload,
    pub v: u8,
    pub r: B256,
    pub s: B256,
}

/// Validity-window violations. The window is the authoritative timeout
/// mechanism for an authorization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("authorization expired (validBefore {valid_before}, now {now})")]
    Expired { valid_before: u64, now: u64 },

    #[error("authorization not yet valid (validAfter {valid_after}, now {now})")]
    NotYetValid { valid_after: u64, now: u64 },

    #[error("validity window too narrow ({remaining}s remaining, {required}s required)")]
    TooNarrow { remaining: u64, required: u64 },
}

impl AuthorizationPayload {
    /// `validAfter <= now <= validBefore`, both bounds inclusive.
    pub fn check_window(&self, now: u64) -> Result<(), WindowError> {
        if now < self.valid_after {
            return Err(WindowError::NotYetValid {
                valid_after: self.valid_after,
                now,
            });
        }
        if now > self.valid_before {
            return Err(WindowError::Expired {
                valid_before: self.valid_before,
                now,
            });
        }
        Ok(())
    }

    /// Window check applied immediately before submission: on top of the
    /// plain window, submission plus confirmation latency (`margin` seconds)
    /// must still fit before `validBefore`. Racing the window loses funds to
    /// mined-but-expired reverts, so the relay refuses instead.
    pub fn check_submission_window(&self, now: u64, margin: u64) -> Result<(), WindowError> {
        self.check_window(now)?;
        let remaining = self.valid_before - now;
        if remaining < margin {
            return Err(WindowError::TooNarrow {
                remaining,
                required: margin,
            });
        }
        Ok(())
    }
}

/// Validate batch shape before any chain interaction: the batch must be
/// non-empty and every authorization must come from the same initiator.
/// Returns the batch initiator.
pub fn validate_batch_shape(authorizations: &[Authorization]) -> Result<Address, RelayError> {
    let first = authorizations.first().ok_or(RelayError::EmptyBatch)?;
    let initiator = first.payload.from;

    for (index, auth) in authorizations.iter().enumerate() {
        if auth.payload.from != initiator {
            return Err(RelayError::MixedInitiators {
                index,
                expected: initiator,
                found: auth.payload.from,
            });
        }
    }

    Ok(initiator)
}

/// Fresh single-use authorization nonce
pub fn random_nonce() -> B256 {
    B256::from(rand::random::<[u8; 32]>())
}

/// Build and sign an authorization for `value` to `to`, valid from now for
/// `validity_secs`. The `from` address is derived from the signing key.
pub fn create_authorization(
    signer: &k256::ecdsa::SigningKey,
    domain: &TypedDomain,
    to: Address,
    value: U256,
    validity_secs: u64,
) -> Authorization {
    let now = chrono::Utc::now().timestamp() as u64;
    let payload = AuthorizationPayload {
        from: signer_address(signer),
        to,
        value,
        valid_after: now,
        valid_before: now + validity_secs,
        nonce: random_nonce(),
    };
    let (v, r, s) = sign_payload(signer, domain, &payload);

    Authorization { payload, v, r, s }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(valid_after: u64, valid_before: u64) -> AuthorizationPayload {
        AuthorizationPayload {
            from: Address::repeat_byte(0x11),
            to: Address::repeat_byte(0x22),
            value: U256::from(100u64),
            valid_after,
            valid_before,
            nonce: B256::repeat_byte(0x33),
        }
    }

    fn auth_from(from: Address) -> Authorization {
        Authorization {
            payload: AuthorizationPayload {
                from,
                ..payload(0, u64::MAX)
            },
            v: 27,
            r: B256::ZERO,
            s: B256::ZERO,
        }
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let p = payload(100, 200);

        assert!(p.check_window(100).is_ok());
        assert!(p.check_window(150).is_ok());
        assert!(p.check_window(200).is_ok());

        assert!(matches!(
            p.check_window(99),
            Err(WindowError::NotYetValid { valid_after: 100, now: 99 })
        ));
        assert!(matches!(
            p.check_window(201),
            Err(WindowError::Expired { valid_before: 200, now: 201 })
        ));
    }

    #[test]
    fn submission_window_requires_margin() {
        let p = payload(100, 200);

        assert!(p.check_submission_window(140, 60).is_ok());
        assert!(matches!(
            p.check_submission_window(141, 60),
            Err(WindowError::TooNarrow { remaining: 59, required: 60 })
        ));
        // An outright expired authorization reports Expired, not TooNarrow
        assert!(matches!(
            p.check_submission_window(201, 60),
            Err(WindowError::Expired { .. })
        ));
    }

    #[test]
    fn empty_batch_rejected() {
        assert!(matches!(
            validate_batch_shape(&[]),
            Err(RelayError::EmptyBatch)
        ));
    }

    #[test]
    fn mixed_initiators_rejected_with_index() {
        let a = Address::repeat_byte(0xaa);
        let b = Address::repeat_byte(0xbb);
        let batch = vec![auth_from(a), auth_from(a), auth_from(b)];

        match validate_batch_shape(&batch) {
            Err(RelayError::MixedInitiators { index, expected, found }) => {
                assert_eq!(index, 2);
                assert_eq!(expected, a);
                assert_eq!(found, b);
            }
            other => panic!("expected MixedInitiators, got {:?}", other),
        }
    }

    #[test]
    fn single_initiator_batch_accepted() {
        let a = Address::repeat_byte(0xaa);
        let batch = vec![auth_from(a), auth_from(a)];
        assert_eq!(validate_batch_shape(&batch).unwrap(), a);
    }

    #[test]
    fn wire_value_is_decimal_string() {
        let p = payload(0, 10);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["value"], "100");
        assert_eq!(json["validAfter"], 0);

        let back: AuthorizationPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }
}
