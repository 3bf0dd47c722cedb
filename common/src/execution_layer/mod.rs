use crate::proof::{ChainSource, TransactionLocation};
use alloy::{
    eips::BlockNumberOrTag,
    primitives::{B256, Bytes},
    providers::{DynProvider, Provider},
};
use anyhow::Error;

/// Read-only access to the target chain.
pub struct ExecutionLayer {
    provider: DynProvider,
    chain_id: u64,
}

impl ExecutionLayer {
    pub async fn new(provider: DynProvider) -> Result<Self, Error> {
        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| Error::msg(format!("Failed to get chain ID: {e}")))?;

        Ok(Self { provider, chain_id })
    }

    /// Skips the chain id lookup when the chain is already known.
    pub fn with_chain_id(provider: DynProvider, chain_id: u64) -> Self {
        Self { provider, chain_id }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub async fn get_latest_block_id(&self) -> Result<u64, Error> {
        self.provider.get_block_number().await.map_err(|e| {
            anyhow::anyhow!(
                "[chain_id: {}] Failed to get latest block number: {}",
                self.chain_id,
                e
            )
        })
    }

    /// Hash of block `number`, checking that the node answered for that block.
    pub async fn get_block_hash(&self, number: u64) -> Result<B256, Error> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "[chain_id: {}] Failed to get block {}: {}",
                    self.chain_id,
                    number,
                    e
                )
            })?
            .ok_or(anyhow::anyhow!(
                "[chain_id: {}] Failed to get block {}: value was None",
                self.chain_id,
                number
            ))?;

        if block.header.number != number {
            return Err(anyhow::anyhow!(
                "[chain_id: {}] Requested block {} but node returned block {}",
                self.chain_id,
                number,
                block.header.number
            ));
        }
        Ok(block.header.hash)
    }

    pub async fn get_raw_block_by_number(&self, number: u64) -> Result<Bytes, Error> {
        self.provider
            .client()
            .request("debug_getRawBlock", (BlockNumberOrTag::Number(number),))
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "[chain_id: {}] Failed to get raw block {}: {}",
                    self.chain_id,
                    number,
                    e
                )
            })
    }

    pub async fn get_transaction_location_by_hash(
        &self,
        tx_hash: B256,
    ) -> Result<Option<TransactionLocation>, Error> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "[chain_id: {}] Failed to get receipt for {}: {}",
                    self.chain_id,
                    tx_hash,
                    e
                )
            })?;

        let Some(receipt) = receipt else {
            return Ok(None);
        };
        // pending transactions have a receipt without a block
        match (
            receipt.block_number,
            receipt.block_hash,
            receipt.transaction_index,
        ) {
            (Some(block_number), Some(block_hash), Some(transaction_index)) => {
                Ok(Some(TransactionLocation {
                    block_number,
                    block_hash,
                    transaction_index,
                    transaction_type: u8::from(receipt.inner.tx_type()),
                }))
            }
            _ => Ok(None),
        }
    }
}

impl ChainSource for ExecutionLayer {
    async fn get_transaction_location(
        &self,
        tx_hash: B256,
    ) -> Result<Option<TransactionLocation>, Error> {
        self.get_transaction_location_by_hash(tx_hash).await
    }

    async fn get_raw_block(&self, number: u64) -> Result<Bytes, Error> {
        self.get_raw_block_by_number(number).await
    }
}
