//! EIP-712 typed-data digests for `TransferWithAuthorization` and secp256k1
//! signature recovery. The digest is domain-separated by the settlement
//! token's name, version, chain id and contract address, so an authorization
//! signed for one token deployment can never be replayed against another.

use alloy_primitives::{keccak256, Address, B256, U256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

use crate::error::TokenError;

use super::{AuthorizationPayload, TypedDomain};

const EIP712_DOMAIN_TYPE: &[u8] =
    b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

const TRANSFER_WITH_AUTHORIZATION_TYPE: &[u8] =
    b"TransferWithAuthorization(address from,address to,uint256 value,uint256 validAfter,uint256 validBefore,bytes32 nonce)";

fn word_from_address(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

fn word_from_u64(value: u64) -> [u8; 32] {
    U256::from(value).to_be_bytes::<32>()
}

/// EIP-712 domain separator for the settlement token
pub fn domain_separator(domain: &TypedDomain) -> B256 {
    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(keccak256(EIP712_DOMAIN_TYPE).as_slice());
    encoded.extend_from_slice(keccak256(domain.name.as_bytes()).as_slice());
    encoded.extend_from_slice(keccak256(domain.version.as_bytes()).as_slice());
    encoded.extend_from_slice(&word_from_u64(domain.chain_id));
    encoded.extend_from_slice(&word_from_address(domain.verifying_contract));
    keccak256(&encoded)
}

/// The digest an authorization signature commits to:
/// `keccak256(0x19 ‖ 0x01 ‖ domainSeparator ‖ structHash)`
pub fn authorization_digest(domain: &TypedDomain, payload: &AuthorizationPayload) -> B256 {
    let mut encoded = Vec::with_capacity(7 * 32);
    encoded.extend_from_slice(keccak256(TRANSFER_WITH_AUTHORIZATION_TYPE).as_slice());
    encoded.extend_from_slice(&word_from_address(payload.from));
    encoded.extend_from_slice(&word_from_address(payload.to));
    encoded.extend_from_slice(&payload.value.to_be_bytes::<32>());
    encoded.extend_from_slice(&word_from_u64(payload.valid_after));
    encoded.extend_from_slice(&word_from_u64(payload.valid_before));
    encoded.extend_from_slice(payload.nonce.as_slice());
    let struct_hash = keccak256(&encoded);

    let mut message = Vec::with_capacity(2 + 2 * 32);
    message.extend_from_slice(&[0x19, 0x01]);
    message.extend_from_slice(domain_separator(domain).as_slice());
    message.extend_from_slice(struct_hash.as_slice());
    keccak256(&message)
}

/// Recover the signing address from a digest and a v/r/s signature.
/// Accepts both the legacy 27/28 and the raw 0/1 recovery id encodings.
pub fn recover_signer(digest: B256, v: u8, r: B256, s: B256) -> Result<Address, TokenError> {
    let recovery_byte = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::from_byte(recovery_byte)
        .ok_or_else(|| TokenError::InvalidSignature(format!("invalid recovery id: {}", v)))?;

    let signature = Signature::from_scalars(r.0, s.0)
        .map_err(|e| TokenError::InvalidSignature(format!("invalid r/s scalars: {}", e)))?;

    let verifying_key = VerifyingKey::recover_from_prehash(digest.as_slice(), &signature, recovery_id)
        .map_err(|e| TokenError::InvalidSignature(format!("recovery failed: {}", e)))?;

    Ok(address_of(&verifying_key))
}

/// Ethereum-style address: last 20 bytes of the keccak of the uncompressed
/// public key (without the 0x04 tag byte).
fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Address controlled by a signing key
pub fn signer_address(key: &SigningKey) -> Address {
    address_of(key.verifying_key())
}

/// Sign an authorization payload, returning the split v/r/s signature with
/// the legacy 27/28 recovery encoding the token contract expects.
pub fn sign_payload(
    key: &SigningKey,
    domain: &TypedDomain,
    payload: &AuthorizationPayload,
) -> (u8, B256, B256) {
    let digest = authorization_digest(domain, payload);
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(digest.as_slice())
        .expect("signing over a 32-byte prehash cannot fail");

    let bytes = signature.to_bytes();
    let r = B256::from_slice(&bytes[..32]);
    let s = B256::from_slice(&bytes[32..]);
    (27 + recovery_id.to_byte(), r, s)
}

/// Parse a secp256k1 signing key from a hex string (with or without 0x)
pub fn signing_key_from_hex(raw: &str) -> Result<SigningKey, TokenError> {
    let stripped = raw.trim().trim_start_matches("0x");
    let bytes = hex::decode(stripped)
        .map_err(|e| TokenError::InvalidSignature(format!("invalid key hex: {}", e)))?;
    SigningKey::from_slice(&bytes)
        .map_err(|e| TokenError::InvalidSignature(format!("invalid signing key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_domain() -> TypedDomain {
        TypedDomain {
            name: "USDT0".to_string(),
            version: "1".to_string(),
            chain_id: 114,
            verifying_contract: Address::repeat_byte(0x42),
        }
    }

    fn test_key() -> SigningKey {
        SigningKey::from_slice(&[0x17; 32]).unwrap()
    }

    fn test_payload(from: Address) -> AuthorizationPayload {
        AuthorizationPayload {
            from,
            to: Address::repeat_byte(0x99),
            value: U256::from(1_000_000u64),
            valid_after: 1_700_000_000,
            valid_before: 1_700_003_600,
            nonce: B256::repeat_byte(0x01),
        }
    }

    #[test]
    fn digest_is_stable_and_field_sensitive() {
        let domain = test_domain();
        let payload = test_payload(Address::repeat_byte(0x11));

        let digest = authorization_digest(&domain, &payload);
        assert_eq!(digest, authorization_digest(&domain, &payload));

        let mut other = payload.clone();
        other.value = U256::from(1_000_001u64);
        assert_ne!(digest, authorization_digest(&domain, &other));

        let mut other_domain = domain.clone();
        other_domain.chain_id = 14;
        assert_ne!(digest, authorization_digest(&other_domain, &payload));
    }

    #[test]
    fn sign_then_recover_roundtrip() {
        let domain = test_domain();
        let key = test_key();
        let payload = test_payload(signer_address(&key));

        let (v, r, s) = sign_payload(&key, &domain, &payload);
        assert!(v == 27 || v == 28);

        let digest = authorization_digest(&domain, &payload);
        let recovered = recover_signer(digest, v, r, s).unwrap();
        assert_eq!(recovered, signer_address(&key));
    }

    #[test]
    fn recover_accepts_raw_recovery_ids() {
        let domain = test_domain();
        let key = test_key();
        let payload = test_payload(signer_address(&key));

        let (v, r, s) = sign_payload(&key, &domain, &payload);
        let digest = authorization_digest(&domain, &payload);

        let recovered = recover_signer(digest, v - 27, r, s).unwrap();
        assert_eq!(recovered, signer_address(&key));
    }

    #[test]
    fn tampered_payload_recovers_a_different_address() {
        let domain = test_domain();
        let key = test_key();
        let payload = test_payload(signer_address(&key));

        let (v, r, s) = sign_payload(&key, &domain, &payload);

        let mut tampered = payload.clone();
        tampered.value = U256::from(5u64);
        let digest = authorization_digest(&domain, &tampered);

        match recover_signer(digest, v, r, s) {
            Ok(address) => assert_ne!(address, signer_address(&key)),
            Err(TokenError::InvalidSignature(_)) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn bad_recovery_id_is_rejected() {
        let digest = B256::repeat_byte(0x07);
        let err = recover_signer(digest, 35, B256::repeat_byte(0x01), B256::repeat_byte(0x02));
        assert!(matches!(err, Err(TokenError::InvalidSignature(_))));
    }

    #[test]
    fn signing_key_from_hex_accepts_prefixed_keys() {
        let hex_key = format!("0x{}", hex::encode([0x17u8; 32]));
        let key = signing_key_from_hex(&hex_key).unwrap();
        assert_eq!(signer_address(&key), signer_address(&test_key()));

        assert!(signing_key_from_hex("zz").is_err());
        assert!(signing_key_from_hex("00").is_err());
    }
}
