use crate::{SharedEngine, db::DataBase};
use alloy::primitives::{Address, B256};
use anyhow::Error;
use common::{execution_layer::ExecutionLayer, utils::watchdog::Watchdog};
use futures_util::future::join_all;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Block hash source for the chain the oracle tracks.
pub trait TargetChain: Send + Sync {
    fn get_latest_block_id(&self) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Must fail when the node answers for another block than `number`.
    fn get_block_hash(&self, number: u64) -> impl Future<Output = Result<B256, Error>> + Send;
}

impl TargetChain for ExecutionLayer {
    async fn get_latest_block_id(&self) -> Result<u64, Error> {
        ExecutionLayer::get_latest_block_id(self).await
    }

    async fn get_block_hash(&self, number: u64) -> Result<B256, Error> {
        ExecutionLayer::get_block_hash(self, number).await
    }
}

#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub updater: Address,
    pub poll_interval: Duration,
    pub max_blocks_per_update: u64,
    pub confirmation_depth: u64,
}

/// Feeds confirmed target chain block hashes into the oracle.
pub struct BlockHashUpdater<T: TargetChain> {
    chain: T,
    engine: SharedEngine,
    db: DataBase,
    config: UpdaterConfig,
    last_done: u64,
}

impl<T: TargetChain> BlockHashUpdater<T> {
    pub fn new(
        chain: T,
        engine: SharedEngine,
        db: DataBase,
        config: UpdaterConfig,
        last_done: u64,
    ) -> Self {
        Self {
            chain,
            engine,
            db,
            config,
            last_done,
        }
    }

    pub fn last_done(&self) -> u64 {
        self.last_done
    }

    /// Submits the next batch of confirmed blocks. Returns how many hashes
    /// were new to the oracle.
    pub async fn update(&mut self) -> Result<usize, Error> {
        let latest = self.chain.get_latest_block_id().await?;
        let confirmed = latest.saturating_sub(self.config.confirmation_depth);
        if confirmed <= self.last_done {
            debug!(
                "No confirmed blocks to submit: latest {}, last done {}",
                latest, self.last_done
            );
            return Ok(0);
        }

        let from = self.last_done.saturating_add(1);
        let to = confirmed.min(
            self.last_done
                .saturating_add(self.config.max_blocks_per_update),
        );
        let numbers: Vec<u64> = (from..=to).collect();
        let hashes = join_all(numbers.iter().map(|number| self.chain.get_block_hash(*number)))
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        let entries: Vec<(u64, B256)> = numbers.into_iter().zip(hashes).collect();

        let written = {
            let mut engine = self.engine.lock().await;
            // a stored hash that differs is passed on so the oracle rejects it
            let pending: Vec<(u64, B256)> = entries
                .iter()
                .filter(|(number, hash)| engine.oracle().block_hashes(*number) != Some(*hash))
                .copied()
                .collect();
            if pending.is_empty() {
                0
            } else {
                engine
                    .set_multiple_block_hashes(self.config.updater, &pending)
                    .map_err(|e| anyhow::anyhow!("Failed to set block hashes {}..={}: {}", from, to, e))?
            }
        };

        self.db.record_batch(&entries, to).await?;
        self.last_done = to;
        info!(
            "Submitted block hashes {}..={} ({} new), latest block {}",
            from, to, written, latest
        );
        Ok(written)
    }

    pub async fn run(mut self, cancel_token: CancellationToken, watchdog_max_failures: u64) {
        info!(
            "Starting block hash updater from block {}",
            self.last_done.saturating_add(1)
        );
        let mut watchdog = Watchdog::new(cancel_token.clone(), watchdog_max_failures);
        loop {
            let delay = match self.update().await {
                Ok(_) => {
                    watchdog.reset();
                    self.config.poll_interval
                }
                Err(e) => {
                    error!("Block hash update failed: {}", e);
                    watchdog.increment();
                    self.config.poll_interval.saturating_mul(5)
                }
            };

            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Cancellation token triggered, stopping block hash updater");
                    return;
                }
                _ = sleep(delay) => {}
            }
        }
    }
}
