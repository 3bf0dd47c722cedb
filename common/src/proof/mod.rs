mod assembler;

pub use assembler::{
    AssemblerConfig, ChainSource, ProofAssembler, TransactionLocation, build_inclusion_proof,
};

use crate::{
    block::BlockHeader,
    error::ProofError,
    rlp,
    transaction::SignedType2Transaction,
    trie::verify_proof,
};
use alloy::primitives::{B256, Bytes, keccak256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AssemblyStage {
    FetchingReceipt,
    FetchingRawBlock,
    BuildingTrie,
    ExtractingProof,
    Packaging,
}

/// Everything a verifier needs besides a trusted block hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionProof {
    pub block_header: Bytes,
    /// Root first, leaf last.
    pub proof_nodes: Vec<Bytes>,
    pub transaction_index_key: Bytes,
    pub claimed_value: Bytes,
}

impl InclusionProof {
    pub fn transaction_index(&self) -> Result<u64, ProofError> {
        rlp::decode_index(&self.transaction_index_key)
    }

    /// Checks the header against `block_hash` and the claimed value against
    /// the header's transactions root. Returns the parsed header.
    pub fn verify(&self, block_hash: B256) -> Result<BlockHeader, ProofError> {
        let actual = keccak256(&self.block_header);
        if actual != block_hash {
            return Err(ProofError::BlockHashMismatch {
                expected: block_hash,
                actual,
            });
        }
        let header = BlockHeader::parse(&self.block_header)?;

        let root = header.transactions_root();
        match self.proof_nodes.first() {
            Some(first) if keccak256(first) == root => {}
            _ => {
                return Err(ProofError::InvalidProof(format!(
                    "first proof node does not hash to transactions root {root}"
                )));
            }
        }

        let value = verify_proof(root, &self.transaction_index_key, &self.proof_nodes)?;
        if value.as_slice() != self.claimed_value.as_ref() {
            return Err(ProofError::InvalidProof(format!(
                "trie value at index {} differs from the claimed transaction",
                self.transaction_index()?
            )));
        }
        Ok(header)
    }
}

/// Output of a successful assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledProof {
    pub proof: InclusionProof,
    pub block_number: u64,
    pub block_hash: B256,
    pub transaction_index: u64,
    pub transaction_hash: B256,
    pub transaction: SignedType2Transaction,
}
