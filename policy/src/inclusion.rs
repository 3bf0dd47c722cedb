use crate::{block_hash_oracle::BlockHashOracle, error::PolicyError};
use alloy::primitives::{Address, B256};
use common::{
    error::ProofError,
    proof::InclusionProof,
    transaction::{SignedType2Transaction, Type2Transaction},
};
use serde::Serialize;

/// A transaction the policy has seen proven against an oracle block hash.
/// The transaction index is carried as proven, never derived from the nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedInclusion {
    pub block_number: u64,
    pub block_hash: B256,
    pub transaction_index: u64,
    pub transaction_hash: B256,
    pub sender: Address,
    pub transaction: Type2Transaction,
}

/// Checks `proof` against the oracle's hash for `block_number` and that the
/// proven value is exactly `signed`.
pub fn verify_inclusion(
    oracle: &BlockHashOracle,
    signed: &SignedType2Transaction,
    proof: &InclusionProof,
    block_number: u64,
) -> Result<AcceptedInclusion, PolicyError> {
    let block_hash = oracle.trusted_block_hash(block_number)?;
    let header = proof.verify(block_hash)?;
    let actual = header.number()?;
    if actual != block_number {
        return Err(PolicyError::BlockNumberMismatch {
            expected: block_number,
            actual,
        });
    }

    let encoded = signed.encoded()?;
    if encoded.as_slice() != proof.claimed_value.as_ref() {
        return Err(PolicyError::Proof(ProofError::InvalidProof(
            "proven transaction differs from the submitted one".to_string(),
        )));
    }

    Ok(AcceptedInclusion {
        block_number,
        block_hash,
        transaction_index: proof.transaction_index()?,
        transaction_hash: signed.hash()?,
        sender: signed.recover_signer()?,
        transaction: signed.transaction.clone(),
    })
}
