//! Authenticated calls to the policy node. The caller is whoever signed
//! `method:caller:nonce:payload` as an EIP-191 personal message.

use super::{EthSignature, SignaturePayload, address_of, derive_and_match};
use crate::error::ProofError;
use alloy::primitives::{Address, B256, Bytes};
use k256::ecdsa::{Signature, SigningKey, signature::hazmat::PrehashSigner};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedRequest {
    pub caller: Address,
    /// Must grow with every request of the same caller.
    pub nonce: u64,
    /// JSON encoded method parameters.
    pub payload: String,
    /// `r || s || v`
    pub signature: Bytes,
}

impl SignedRequest {
    pub fn message(method: &str, caller: Address, nonce: u64, payload: &str) -> String {
        format!("{method}:{caller}:{nonce}:{payload}")
    }

    pub fn sign(
        key: &SigningKey,
        method: &str,
        nonce: u64,
        payload: String,
    ) -> Result<Self, ProofError> {
        let caller = address_of(key.verifying_key());
        let message = Self::message(method, caller, nonce, &payload);
        let personal = SignaturePayload::PersonalMessage(message.as_bytes());
        let signature: Signature = key
            .sign_prehash(personal.digest().as_slice())
            .map_err(|e| ProofError::MalformedSignature(format!("signing failed: {e}")))?;
        let raw = signature.to_bytes();
        let signature = derive_and_match(
            B256::from_slice(&raw[..32]),
            B256::from_slice(&raw[32..]),
            &personal,
            caller,
        )?;
        Ok(Self {
            caller,
            nonce,
            payload,
            signature: Bytes::copy_from_slice(&signature.to_bytes()),
        })
    }

    /// Returns the caller once the signature over `method` resolves to it.
    pub fn verify(&self, method: &str) -> Result<Address, ProofError> {
        let signature = EthSignature::from_bytes(&self.signature)?;
        let message = Self::message(method, self.caller, self.nonce, &self.payload);
        let recovered =
            signature.recover(SignaturePayload::PersonalMessage(message.as_bytes()).digest())?;
        if recovered != self.caller {
            return Err(ProofError::NoMatchingRecoveryId {
                expected: self.caller,
                recovered: vec![recovered],
            });
        }
        Ok(recovered)
    }
}
