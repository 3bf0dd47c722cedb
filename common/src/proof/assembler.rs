use super::{AssembledProof, AssemblyStage, InclusionProof};
use crate::{
    block::RawBlock,
    error::ProofError,
    rlp,
    transaction::{SignedType2Transaction, TYPE2_TX_TYPE},
    trie::PatriciaTrie,
};
use alloy::primitives::{B256, Bytes};
use anyhow::Error;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Where the target chain says a transaction landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionLocation {
    pub block_number: u64,
    pub block_hash: B256,
    pub transaction_index: u64,
    pub transaction_type: u8,
}

/// Read access to the target chain.
pub trait ChainSource: Send + Sync {
    /// `None` when the chain has no receipt for `tx_hash`.
    fn get_transaction_location(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<Option<TransactionLocation>, Error>> + Send;

    /// `debug_getRawBlock` for `number`.
    fn get_raw_block(&self, number: u64) -> impl Future<Output = Result<Bytes, Error>> + Send;
}

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub max_attempts: u32,
    /// First retry delay, doubled on each further attempt.
    pub backoff_ms: u64,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 500,
        }
    }
}

pub struct ProofAssembler<C: ChainSource> {
    source: C,
    config: AssemblerConfig,
}

impl<C: ChainSource> ProofAssembler<C> {
    pub fn new(source: C, config: AssemblerConfig) -> Self {
        Self { source, config }
    }

    pub fn source(&self) -> &C {
        &self.source
    }

    pub async fn assemble(&self, tx_hash: B256) -> Result<AssembledProof, ProofError> {
        let location = self
            .with_retry(AssemblyStage::FetchingReceipt, || {
                self.source.get_transaction_location(tx_hash)
            })
            .await?
            .ok_or(ProofError::TransactionNotFound(tx_hash))?;
        if location.transaction_type != TYPE2_TX_TYPE {
            return Err(ProofError::UnsupportedTransactionType(
                location.transaction_type,
            ));
        }
        debug!(
            "Transaction {} found in block {} at index {}",
            tx_hash, location.block_number, location.transaction_index
        );

        let raw = self
            .with_retry(AssemblyStage::FetchingRawBlock, || {
                self.source.get_raw_block(location.block_number)
            })
            .await?;
        let block = RawBlock::decode(&raw)?;
        let number = block.header.number()?;
        if number != location.block_number {
            return Err(ProofError::InvalidProof(format!(
                "requested block {} but raw block is {}",
                location.block_number, number
            )));
        }
        let actual = block.header.hash();
        if actual != location.block_hash {
            return Err(ProofError::BlockHashMismatch {
                expected: location.block_hash,
                actual,
            });
        }
        debug!(
            "Fetched raw block {} with {} transactions",
            number,
            block.transactions.len()
        );

        let assembled = build_inclusion_proof(&block, location.transaction_index)?;
        if assembled.transaction_hash != tx_hash {
            return Err(ProofError::InvalidProof(format!(
                "transaction at index {} of block {} hashes to {}, expected {}",
                location.transaction_index, number, assembled.transaction_hash, tx_hash
            )));
        }
        Ok(assembled)
    }

    async fn with_retry<T, F, Fut>(&self, stage: AssemblyStage, mut call: F) -> Result<T, ProofError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut delay = self.config.backoff_ms;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts => {
                    warn!(
                        "{} attempt {}/{} failed: {}, retrying in {} ms",
                        stage, attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    return Err(ProofError::Transient {
                        stage,
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

/// Rebuilds the transactions trie of `block` and extracts the proof for the
/// transaction at `index`. Only type 2 transactions can be packaged.
pub fn build_inclusion_proof(block: &RawBlock, index: u64) -> Result<AssembledProof, ProofError> {
    let block_number = block.header.number()?;

    debug!("{} for block {}", AssemblyStage::BuildingTrie, block_number);
    let trie = PatriciaTrie::from_transactions(&block.transactions);
    let expected = block.header.transactions_root();
    let actual = trie.root_hash();
    if actual != expected {
        return Err(ProofError::TrieRootMismatch {
            block_number,
            expected,
            actual,
        });
    }

    debug!(
        "{} for index {} of block {}",
        AssemblyStage::ExtractingProof,
        index,
        block_number
    );
    let claimed_value = block.transaction(index)?;
    let key = rlp::encode_index(index);
    let proof_nodes = trie.prove(&key)?;

    debug!("{} proof of {} nodes", AssemblyStage::Packaging, proof_nodes.len());
    let transaction = SignedType2Transaction::decode_signed(claimed_value)?;
    let transaction_hash = transaction.hash()?;
    Ok(AssembledProof {
        proof: InclusionProof {
            block_header: block.header.serialize().into(),
            proof_nodes,
            transaction_index_key: key.into(),
            claimed_value: Bytes::copy_from_slice(claimed_value),
        },
        block_number,
        block_hash: block.header.hash(),
        transaction_index: index,
        transaction_hash,
        transaction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{self, TestBlock};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockSource {
        block: TestBlock,
        location: Option<TransactionLocation>,
        raw_block_failures: AtomicU32,
        raw_block_calls: AtomicU32,
    }

    impl MockSource {
        fn new(block: TestBlock, index: u64) -> Self {
            let location = TransactionLocation {
                block_number: block.number,
                block_hash: block.hash(),
                transaction_index: index,
                transaction_type: TYPE2_TX_TYPE,
            };
            Self {
                block,
                location: Some(location),
                raw_block_failures: AtomicU32::new(0),
                raw_block_calls: AtomicU32::new(0),
            }
        }

        fn failing(self, failures: u32) -> Self {
            self.raw_block_failures.store(failures, Ordering::SeqCst);
            self
        }
    }

    impl ChainSource for MockSource {
        async fn get_transaction_location(
            &self,
            _tx_hash: B256,
        ) -> Result<Option<TransactionLocation>, Error> {
            Ok(self.location)
        }

        async fn get_raw_block(&self, number: u64) -> Result<Bytes, Error> {
            self.raw_block_calls.fetch_add(1, Ordering::SeqCst);
            if self.raw_block_failures.load(Ordering::SeqCst) > 0 {
                self.raw_block_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(anyhow::anyhow!("connection reset"));
            }
            if number != self.block.number {
                return Err(anyhow::anyhow!("unknown block {number}"));
            }
            Ok(self.block.raw.clone())
        }
    }

    fn config() -> AssemblerConfig {
        AssemblerConfig {
            max_attempts: 3,
            backoff_ms: 100,
        }
    }

    #[tokio::test]
    async fn test_assemble_returns_verifiable_proof() {
        let block = test_utils::block_with_transfers(77, 6).unwrap();
        let expected = block.signed(4).unwrap();
        let assembler = ProofAssembler::new(MockSource::new(block, 4), config());

        let assembled = assembler.assemble(expected.hash().unwrap()).await.unwrap();
        assert_eq!(assembled.block_number, 77);
        assert_eq!(assembled.transaction_index, 4);
        assert_eq!(assembled.transaction, expected);
        let header = assembled.proof.verify(assembled.block_hash).unwrap();
        assert_eq!(header.number().unwrap(), 77);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let block = test_utils::block_with_transfers(5, 2).unwrap();
        let tx_hash = block.signed(1).unwrap().hash().unwrap();
        let assembler = ProofAssembler::new(MockSource::new(block, 1).failing(2), config());

        assert!(assembler.assemble(tx_hash).await.is_ok());
        assert_eq!(
            assembler.source().raw_block_calls.load(Ordering::SeqCst),
            3
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let block = test_utils::block_with_transfers(5, 2).unwrap();
        let tx_hash = block.signed(0).unwrap().hash().unwrap();
        let assembler = ProofAssembler::new(MockSource::new(block, 0).failing(10), config());

        let err = assembler.assemble(tx_hash).await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(
            err,
            ProofError::Transient {
                stage: AssemblyStage::FetchingRawBlock,
                attempts: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_transaction_fails_fast() {
        let block = test_utils::block_with_transfers(5, 2).unwrap();
        let mut source = MockSource::new(block, 0);
        source.location = None;
        let assembler = ProofAssembler::new(source, config());

        let tx_hash = B256::repeat_byte(0x10);
        assert_eq!(
            assembler.assemble(tx_hash).await,
            Err(ProofError::TransactionNotFound(tx_hash))
        );
        assert_eq!(
            assembler.source().raw_block_calls.load(Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn test_non_type2_transaction_fails_fast() {
        let block = test_utils::block_with_transfers(5, 2).unwrap();
        let mut source = MockSource::new(block, 0);
        if let Some(location) = source.location.as_mut() {
            location.transaction_type = 0;
        }
        let assembler = ProofAssembler::new(source, config());

        assert_eq!(
            assembler.assemble(B256::repeat_byte(0x10)).await,
            Err(ProofError::UnsupportedTransactionType(0))
        );
    }

    #[tokio::test]
    async fn test_wrong_transactions_root_fails_fast() {
        let block = test_utils::block_with_transfers(9, 3).unwrap();
        let tampered = block.with_transactions_root(B256::repeat_byte(0x0f)).unwrap();
        let tx_hash = tampered.signed(0).unwrap().hash().unwrap();
        let assembler = ProofAssembler::new(MockSource::new(tampered, 0), config());

        match assembler.assemble(tx_hash).await {
            Err(ProofError::TrieRootMismatch {
                block_number,
                expected,
                ..
            }) => {
                assert_eq!(block_number, 9);
                assert_eq!(expected, B256::repeat_byte(0x0f));
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(
            assembler.source().raw_block_calls.load(Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_index_pointing_at_other_transaction_is_rejected() {
        let block = test_utils::block_with_transfers(5, 3).unwrap();
        let tx_hash = block.signed(2).unwrap().hash().unwrap();
        let assembler = ProofAssembler::new(MockSource::new(block, 1), config());

        assert!(matches!(
            assembler.assemble(tx_hash).await,
            Err(ProofError::InvalidProof(_))
        ));
    }

    #[test]
    fn test_build_rejects_legacy_transaction() {
        let block = test_utils::build_block(3, vec![test_utils::legacy_transaction()]).unwrap();
        let raw = block.decode().unwrap();
        assert_eq!(
            build_inclusion_proof(&raw, 0),
            Err(ProofError::UnsupportedTransactionType(0))
        );
        assert_eq!(
            build_inclusion_proof(&raw, 1),
            Err(ProofError::TransactionIndexOutOfRange { index: 1, count: 1 })
        );
    }
}
