use crate::proof::AssemblyStage;
use alloy::primitives::{Address, B256};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    MalformedEncoding(String),
    InvalidProof(String),
    KeyNotFound,
    TransactionNotFound(B256),
    UnsupportedTransactionType(u8),
    TransactionIndexOutOfRange {
        index: u64,
        count: usize,
    },
    TrieRootMismatch {
        block_number: u64,
        expected: B256,
        actual: B256,
    },
    BlockHashMismatch {
        expected: B256,
        actual: B256,
    },
    MalformedSignature(String),
    NoMatchingRecoveryId {
        expected: Address,
        recovered: Vec<Address>,
    },
    Transient {
        stage: AssemblyStage,
        attempts: u32,
        message: String,
    },
}

impl ProofError {
    /// Only RPC failures are worth another attempt; everything else is a
    /// property of the data and will fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProofError::Transient { .. })
    }
}

impl fmt::Display for ProofError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofError::MalformedEncoding(msg) => write!(f, "Malformed encoding: {msg}"),
            ProofError::InvalidProof(msg) => write!(f, "Invalid proof: {msg}"),
            ProofError::KeyNotFound => write!(f, "Key not found in trie"),
            ProofError::TransactionNotFound(hash) => {
                write!(f, "Transaction {hash} not found on target chain")
            }
            ProofError::UnsupportedTransactionType(tx_type) => {
                write!(f, "Unsupported transaction type {tx_type}, only type 2 is supported")
            }
            ProofError::TransactionIndexOutOfRange { index, count } => {
                write!(f, "Transaction index {index} out of range, block has {count} transactions")
            }
            ProofError::TrieRootMismatch {
                block_number,
                expected,
                actual,
            } => write!(
                f,
                "Transactions root mismatch in block {block_number}: header has {expected}, rebuilt trie has {actual}"
            ),
            ProofError::BlockHashMismatch { expected, actual } => {
                write!(f, "Block hash mismatch: expected {expected}, header hashes to {actual}")
            }
            ProofError::MalformedSignature(msg) => write!(f, "Malformed signature: {msg}"),
            ProofError::NoMatchingRecoveryId {
                expected,
                recovered,
            } => write!(
                f,
                "No recovery id matches expected signer {expected}, recovered {recovered:?}"
            ),
            ProofError::Transient {
                stage,
                attempts,
                message,
            } => write!(f, "{stage} failed after {attempts} attempts: {message}"),
        }
    }
}

impl std::error::Error for ProofError {}
