use alloy::primitives::{Address, U256};
use anyhow::Error;
use common::proof::AssemblerConfig;
use policy::auction::AuctionConfig;
use std::{net::SocketAddr, str::FromStr, time::Duration};

const DAY_SEC: u64 = 24 * 3600;

#[derive(Debug, Clone)]
pub struct Config {
    pub target_rpc_url: String,
    pub db_filename: String,
    pub rpc_listen_addr: SocketAddr,
    pub poll_interval: Duration,
    pub max_blocks_per_update: u64,
    pub confirmation_depth: u64,
    pub last_done: Option<u64>,
    pub owner_address: Address,
    pub updater_address: Address,
    pub signer_master_secret: String,
    pub auction: AuctionConfig,
    pub initial_owner: Address,
    pub initial_encumbrance_time_sec: u64,
    pub watchdog_max_failures: u64,
    pub assembler: AssemblerConfig,
}

fn required(name: &str) -> Result<String, Error> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("{} env var not found", name))
}

fn number(name: &str, default: &str) -> Result<u64, Error> {
    std::env::var(name)
        .unwrap_or(default.to_string())
        .parse::<u64>()
        .map_err(|_| anyhow::anyhow!("{} must be a number", name))
}

fn address(name: &str) -> Result<Address, Error> {
    Address::from_str(&required(name)?)
        .map_err(|e| anyhow::anyhow!("{} must be an address: {}", name, e))
}

impl Config {
    pub fn new() -> Result<Self, Error> {
        // Load environment variables from .env file
        dotenvy::dotenv().ok();

        let target_rpc_url = required("TARGET_RPC_URL")?;

        let db_filename =
            std::env::var("DB_FILENAME").unwrap_or("block_hashes.sqlite".to_string());

        let rpc_listen_addr = std::env::var("RPC_LISTEN_ADDR")
            .unwrap_or("127.0.0.1:8547".to_string())
            .parse::<SocketAddr>()
            .map_err(|_| anyhow::anyhow!("RPC_LISTEN_ADDR must be a socket address"))?;

        let poll_interval = Duration::from_millis(number("POLL_INTERVAL_MS", "1000")?);

        let max_blocks_per_update = number("MAX_BLOCKS_PER_UPDATE", "10").and_then(|val| {
            if val == 0 {
                return Err(anyhow::anyhow!(
                    "MAX_BLOCKS_PER_UPDATE must be a positive number"
                ));
            }
            Ok(val)
        })?;

        let confirmation_depth = number("CONFIRMATION_DEPTH", "2")?;

        let last_done = match std::env::var("LAST_DONE") {
            Ok(val) => Some(
                val.parse::<u64>()
                    .map_err(|_| anyhow::anyhow!("LAST_DONE must be a number"))?,
            ),
            Err(_) => None,
        };

        let owner_address = address("OWNER_ADDRESS")?;
        let updater_address = address("UPDATER_ADDRESS")?;
        let signer_master_secret = required("SIGNER_MASTER_SECRET")?;

        let token_id = U256::from_str(
            &std::env::var("NFT_TOKEN_ID").unwrap_or("0".to_string()),
        )
        .map_err(|_| anyhow::anyhow!("NFT_TOKEN_ID must be a number"))?;

        let auction = AuctionConfig {
            nft_contract: address("NFT_CONTRACT")?,
            token_id,
            target_chain_id: number("TARGET_CHAIN_ID", "17000")?,
            min_ownership_time: number("MIN_OWNERSHIP_TIME_SEC", "60")?,
            min_encumbrance_time_left: number(
                "MIN_ENCUMBRANCE_TIME_LEFT_SEC",
                &(14 * DAY_SEC).to_string(),
            )?,
        };

        let initial_owner = address("INITIAL_OWNER")?;
        let initial_encumbrance_time_sec =
            number("INITIAL_ENCUMBRANCE_TIME_SEC", &(28 * DAY_SEC).to_string())?;

        let watchdog_max_failures = number("WATCHDOG_MAX_FAILURES", "10")?;

        let default_assembler = AssemblerConfig::default();
        let assembler = AssemblerConfig {
            max_attempts: std::env::var("PROOF_MAX_ATTEMPTS")
                .unwrap_or(default_assembler.max_attempts.to_string())
                .parse::<u32>()
                .map_err(|_| anyhow::anyhow!("PROOF_MAX_ATTEMPTS must be a number"))?,
            backoff_ms: number(
                "PROOF_BACKOFF_MS",
                &default_assembler.backoff_ms.to_string(),
            )?,
        };

        tracing::info!(
            "Startup config:\ntarget_rpc_url: {}\ndb_filename: {}\nrpc_listen_addr: {}\npoll_interval: {:?}\nmax_blocks_per_update: {}\nconfirmation_depth: {}\nlast_done: {:?}\nowner: {}\nupdater: {}\nnft_contract: {}\ntoken_id: {}\ntarget_chain_id: {}\nmin_ownership_time: {}s\nmin_encumbrance_time_left: {}s\ninitial_owner: {}\ninitial_encumbrance_time: {}s\nwatchdog_max_failures: {}\nproof_max_attempts: {}\nproof_backoff_ms: {}",
            target_rpc_url,
            db_filename,
            rpc_listen_addr,
            poll_interval,
            max_blocks_per_update,
            confirmation_depth,
            last_done,
            owner_address,
            updater_address,
            auction.nft_contract,
            auction.token_id,
            auction.target_chain_id,
            auction.min_ownership_time,
            auction.min_encumbrance_time_left,
            initial_owner,
            initial_encumbrance_time_sec,
            watchdog_max_failures,
            assembler.max_attempts,
            assembler.backoff_ms
        );

        Ok(Config {
            target_rpc_url,
            db_filename,
            rpc_listen_addr,
            poll_interval,
            max_blocks_per_update,
            confirmation_depth,
            last_done,
            owner_address,
            updater_address,
            signer_master_secret,
            auction,
            initial_owner,
            initial_encumbrance_time_sec,
            watchdog_max_failures,
            assembler,
        })
    }
}
