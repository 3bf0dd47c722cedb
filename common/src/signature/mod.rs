//! Turns the DER signatures produced by the enclave signer into Ethereum
//! `(r, s, v)` signatures. DER carries no recovery id, so `v` is found by
//! recovering both candidates and comparing against the expected signer.

mod der;
mod request;

use crate::error::ProofError;
use alloy::primitives::{Address, B256, U256, eip191_hash_message, keccak256};
pub use der::parse_der;
pub use request::SignedRequest;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};

const RECOVERY_IDS: [u8; 2] = [27, 28];

/// How the signed bytes were turned into the 32 byte digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignaturePayload<'a> {
    /// `keccak256(bytes)`, used for serialized transactions.
    RawMessage(&'a [u8]),
    /// EIP-191 `personal_sign` digest.
    PersonalMessage(&'a [u8]),
    Digest(B256),
    /// EIP-712 `keccak256(0x1901 || domainSeparator || structHash)`.
    TypedData {
        domain_separator: B256,
        struct_hash: B256,
    },
}

impl SignaturePayload<'_> {
    pub fn digest(&self) -> B256 {
        match self {
            SignaturePayload::RawMessage(bytes) => keccak256(bytes),
            SignaturePayload::PersonalMessage(message) => eip191_hash_message(message),
            SignaturePayload::Digest(digest) => *digest,
            SignaturePayload::TypedData {
                domain_separator,
                struct_hash,
            } => {
                let mut buf = [0u8; 66];
                buf[..2].copy_from_slice(&[0x19, 0x01]);
                buf[2..34].copy_from_slice(domain_separator.as_slice());
                buf[34..].copy_from_slice(struct_hash.as_slice());
                keccak256(buf)
            }
        }
    }
}

/// Payload kinds selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum PayloadMode {
    Bytes,
    Message,
    Digest,
    /// `domainSeparator || structHash`, 64 bytes.
    TypedData,
}

impl PayloadMode {
    pub fn payload<'a>(&self, data: &'a [u8]) -> Result<SignaturePayload<'a>, ProofError> {
        match self {
            PayloadMode::Bytes => Ok(SignaturePayload::RawMessage(data)),
            PayloadMode::Message => Ok(SignaturePayload::PersonalMessage(data)),
            PayloadMode::Digest => {
                if data.len() != 32 {
                    return Err(ProofError::MalformedSignature(format!(
                        "digest must be 32 bytes, got {}",
                        data.len()
                    )));
                }
                Ok(SignaturePayload::Digest(B256::from_slice(data)))
            }
            PayloadMode::TypedData => {
                if data.len() != 64 {
                    return Err(ProofError::MalformedSignature(format!(
                        "typed data must be domain separator and struct hash, got {} bytes",
                        data.len()
                    )));
                }
                Ok(SignaturePayload::TypedData {
                    domain_separator: B256::from_slice(&data[..32]),
                    struct_hash: B256::from_slice(&data[32..]),
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthSignature {
    pub r: B256,
    pub s: B256,
    /// 27 or 28.
    pub v: u8,
}

impl EthSignature {
    pub fn y_parity(&self) -> Result<bool, ProofError> {
        match self.v {
            27 => Ok(false),
            28 => Ok(true),
            v => Err(ProofError::MalformedSignature(format!(
                "v must be 27 or 28, got {v}"
            ))),
        }
    }

    pub fn from_parity(r: B256, s: B256, y_parity: bool) -> Self {
        Self {
            r,
            s,
            v: if y_parity { 28 } else { 27 },
        }
    }

    pub fn r_u256(&self) -> U256 {
        U256::from_be_bytes(self.r.0)
    }

    pub fn s_u256(&self) -> U256 {
        U256::from_be_bytes(self.s.0)
    }

    /// `r || s || v`, the layout contracts expect for `ecrecover` checks.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(self.r.as_slice());
        out[32..64].copy_from_slice(self.s.as_slice());
        out[64] = self.v;
        out
    }

    /// Parses `r || s || v`. A `v` of 0 or 1 is taken as the y parity.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProofError> {
        let bytes: &[u8; 65] = bytes.try_into().map_err(|_| {
            ProofError::MalformedSignature(format!("expected 65 bytes, got {}", bytes.len()))
        })?;
        let signature = Self {
            r: B256::from_slice(&bytes[..32]),
            s: B256::from_slice(&bytes[32..64]),
            v: match bytes[64] {
                0 | 1 => bytes[64] + 27,
                v => v,
            },
        };
        signature.y_parity()?;
        Ok(signature)
    }

    /// Recovers the signer of `digest`.
    pub fn recover(&self, digest: B256) -> Result<Address, ProofError> {
        let signature = to_k256(self.r, self.s)?;
        if signature.normalize_s().is_some() {
            return Err(ProofError::MalformedSignature(
                "s is in the upper half of the curve order".to_string(),
            ));
        }
        recover_address(&signature, digest, self.v)
    }
}

/// Both recovery candidates for `(r, s)` over `payload`. A high `s` is first
/// normalized, so every returned `v` pairs with the low-`s` form.
pub fn recover_candidates(
    r: B256,
    s: B256,
    payload: &SignaturePayload<'_>,
) -> Result<Vec<(u8, Address)>, ProofError> {
    let signature = normalized(to_k256(r, s)?);
    let digest = payload.digest();
    Ok(RECOVERY_IDS
        .iter()
        .filter_map(|v| {
            recover_address(&signature, digest, *v)
                .ok()
                .map(|address| (*v, address))
        })
        .collect())
}

/// Returns the signature whose recovery yields `expected`.
pub fn derive_and_match(
    r: B256,
    s: B256,
    payload: &SignaturePayload<'_>,
    expected: Address,
) -> Result<EthSignature, ProofError> {
    let candidates = recover_candidates(r, s, payload)?;
    let s = {
        let bytes = normalized(to_k256(r, s)?).to_bytes();
        B256::from_slice(&bytes[32..])
    };
    match candidates.iter().find(|(_, address)| *address == expected) {
        Some((v, _)) => Ok(EthSignature { r, s, v: *v }),
        None => Err(ProofError::NoMatchingRecoveryId {
            expected,
            recovered: candidates.into_iter().map(|(_, address)| address).collect(),
        }),
    }
}

/// Parses a DER signature and resolves its recovery id in one step.
pub fn der_to_eth_signature(
    der: &[u8],
    payload: &SignaturePayload<'_>,
    expected: Address,
) -> Result<EthSignature, ProofError> {
    let (r, s) = parse_der(der)?;
    derive_and_match(r, s, payload, expected)
}

pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    // drop the 0x04 uncompressed tag
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

fn to_k256(r: B256, s: B256) -> Result<Signature, ProofError> {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(r.as_slice());
    bytes[32..].copy_from_slice(s.as_slice());
    Signature::from_slice(&bytes)
        .map_err(|e| ProofError::MalformedSignature(format!("invalid r or s: {e}")))
}

fn normalized(signature: Signature) -> Signature {
    signature.normalize_s().unwrap_or(signature)
}

fn recover_address(signature: &Signature, digest: B256, v: u8) -> Result<Address, ProofError> {
    let recovery_id = RecoveryId::new(v == 28, false);
    VerifyingKey::recover_from_prehash(digest.as_slice(), signature, recovery_id)
        .map(|key| address_of(&key))
        .map_err(|e| ProofError::MalformedSignature(format!("recovery with v={v} failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;
    use k256::ecdsa::signature::hazmat::PrehashSigner;

    fn signing_key(byte: u8) -> SigningKey {
        SigningKey::from_slice(&[byte; 32]).unwrap()
    }

    fn der_sign(key: &SigningKey, digest: B256) -> Vec<u8> {
        let signature: Signature = key.sign_prehash(digest.as_slice()).unwrap();
        signature.to_der().as_bytes().to_vec()
    }

    #[test]
    fn test_derive_and_match_recovers_signer_for_every_mode() {
        let key = signing_key(0x42);
        let signer = address_of(key.verifying_key());
        let tx_bytes = b"\x02\xf0 unsigned transaction bytes";
        let typed = SignaturePayload::TypedData {
            domain_separator: B256::repeat_byte(0xd0),
            struct_hash: B256::repeat_byte(0x5e),
        };

        for payload in [
            SignaturePayload::RawMessage(tx_bytes),
            SignaturePayload::PersonalMessage(b"hello encumbrance"),
            SignaturePayload::Digest(B256::repeat_byte(0x77)),
            typed,
        ] {
            let der = der_sign(&key, payload.digest());
            let signature = der_to_eth_signature(&der, &payload, signer).unwrap();
            assert!(signature.v == 27 || signature.v == 28);

            let reference = alloy::primitives::Signature::new(
                signature.r_u256(),
                signature.s_u256(),
                signature.y_parity().unwrap(),
            );
            assert_eq!(
                reference
                    .recover_address_from_prehash(&payload.digest())
                    .unwrap(),
                signer
            );
            assert_eq!(signature.recover(payload.digest()).unwrap(), signer);
        }
    }

    #[test]
    fn test_candidates_cover_both_recovery_ids() {
        let key = signing_key(0x07);
        let digest = B256::repeat_byte(0x99);
        let (r, s) = parse_der(&der_sign(&key, digest)).unwrap();
        let candidates = recover_candidates(r, s, &SignaturePayload::Digest(digest)).unwrap();
        assert!(!candidates.is_empty());
        assert!(candidates.iter().all(|(v, _)| *v == 27 || *v == 28));
        assert_eq!(
            candidates
                .iter()
                .filter(|(_, address)| *address == address_of(key.verifying_key()))
                .count(),
            1
        );
    }

    #[test]
    fn test_wrong_expected_signer_is_fatal() {
        let key = signing_key(0x11);
        let digest = B256::repeat_byte(0x01);
        let der = der_sign(&key, digest);
        let stranger = Address::repeat_byte(0xee);
        match der_to_eth_signature(&der, &SignaturePayload::Digest(digest), stranger) {
            Err(ProofError::NoMatchingRecoveryId {
                expected,
                recovered,
            }) => {
                assert_eq!(expected, stranger);
                assert!(recovered.contains(&address_of(key.verifying_key())));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_high_s_is_normalized() {
        let key = signing_key(0x23);
        let digest = B256::repeat_byte(0x45);
        let low: Signature = key.sign_prehash(digest.as_slice()).unwrap();
        let (r, s) = parse_der(low.to_der().as_bytes()).unwrap();

        // s' = n - s is an equally valid signature with the opposite parity
        let order = U256::from_str_radix(
            "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141",
            16,
        )
        .unwrap();
        let high_s = order - U256::from_be_bytes(s.0);
        let high_s = B256::from(high_s.to_be_bytes::<32>());

        let signer = address_of(key.verifying_key());
        let signature =
            derive_and_match(r, high_s, &SignaturePayload::Digest(digest), signer).unwrap();
        assert_eq!(signature.s, s);
        assert_eq!(signature.recover(digest).unwrap(), signer);
    }

    #[test]
    fn test_signature_bytes_layout() {
        let signature = EthSignature::from_parity(B256::repeat_byte(1), B256::repeat_byte(2), true);
        let bytes = signature.to_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[63], 2);
        assert_eq!(bytes[64], 28);
        assert!(
            EthSignature {
                v: 29,
                ..signature
            }
            .y_parity()
            .is_err()
        );
    }

    #[test]
    fn test_payload_mode_parsing() {
        assert_eq!("bytes".parse::<PayloadMode>().unwrap(), PayloadMode::Bytes);
        assert_eq!("message".parse::<PayloadMode>().unwrap(), PayloadMode::Message);
        assert_eq!(PayloadMode::Digest.to_string(), "digest");
        assert!(PayloadMode::Digest.payload(&[0u8; 31]).is_err());
        assert_eq!(
            "typed-data".parse::<PayloadMode>().unwrap(),
            PayloadMode::TypedData
        );
    }

    #[test]
    fn test_typed_data_mode_splits_hashes() {
        let mut data = [0x11u8; 64];
        data[32..].fill(0x22);
        let payload = PayloadMode::TypedData.payload(&data).unwrap();
        assert_eq!(
            payload,
            SignaturePayload::TypedData {
                domain_separator: B256::repeat_byte(0x11),
                struct_hash: B256::repeat_byte(0x22),
            }
        );
        assert!(PayloadMode::TypedData.payload(&data[..63]).is_err());
    }
}
