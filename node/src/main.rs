mod block_hash_updater;
mod clock;
mod command;
mod config;
mod db;
mod rpc;

use anyhow::Error;
use block_hash_updater::{BlockHashUpdater, UpdaterConfig};
use clock::NodeClock;
use command::{EngineSetup, restore_engine};
use common::{
    execution_layer::ExecutionLayer,
    proof::ProofAssembler,
    shared::alloy_tools::create_alloy_provider_without_wallet,
    signer::{DerSigner, LocalDerSigner, create_signer},
};
use config::Config;
use db::DataBase;
use policy::{EngineConfig, PolicyEngine};
use rpc::{RpcContext, start_rpc_server};
use std::sync::Arc;
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub type Engine = PolicyEngine<NodeClock, LocalDerSigner>;
pub type SharedEngine = Arc<Mutex<Engine>>;

enum ExecutionStopped {
    CloseApp,
    RecreateNode,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    common::utils::logging::init_logging()?;

    info!("🚀 Starting Encumbrance Node v{}", env!("CARGO_PKG_VERSION"));

    // Policy state outlives node recreation
    let config = Config::new()?;
    let db = DataBase::new(&config.db_filename).await?;
    let engine: SharedEngine = Arc::new(Mutex::new(
        restore_engine(engine_setup(&config)?, &db).await?,
    ));

    let mut iteration = 0;
    loop {
        iteration += 1;
        match run_node(iteration, &config, engine.clone(), db.clone()).await {
            Ok(ExecutionStopped::CloseApp) => {
                info!("👋 ExecutionStopped::CloseApp , shutting down...");
                break;
            }
            Ok(ExecutionStopped::RecreateNode) => {
                info!("🔄 ExecutionStopped::RecreateNode, recreating node...");
                continue;
            }
            Err(e) => {
                error!("Failed to run node: {}", e);
                return Err(e);
            }
        }
    }

    Ok(())
}

async fn run_node(
    iteration: u64,
    config: &Config,
    engine: SharedEngine,
    db: DataBase,
) -> Result<ExecutionStopped, Error> {
    info!("Running node iteration: {iteration}");

    let provider = create_alloy_provider_without_wallet(&config.target_rpc_url).await?;
    let execution_layer = ExecutionLayer::new(provider.clone()).await?;
    if execution_layer.chain_id() != config.auction.target_chain_id {
        return Err(anyhow::anyhow!(
            "Target RPC serves chain {} but TARGET_CHAIN_ID is {}",
            execution_layer.chain_id(),
            config.auction.target_chain_id
        ));
    }

    let last_done = match (db.get_last_done().await?, config.last_done) {
        (0, Some(last_done)) => {
            db.update_status(last_done).await?;
            last_done
        }
        (0, None) => {
            let latest = execution_layer.get_latest_block_id().await?;
            let last_done = latest.saturating_sub(config.confirmation_depth);
            db.update_status(last_done).await?;
            last_done
        }
        (last_done, _) => last_done,
    };

    let cancel_token = CancellationToken::new();

    // Set up panic hook to cancel token on panic
    let panic_cancel_token = cancel_token.clone();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!("Panic occurred: {:?}", panic_info);
        panic_cancel_token.cancel();
        info!("Cancellation token triggered, initiating shutdown...");
    }));

    let updater = BlockHashUpdater::new(
        execution_layer,
        engine.clone(),
        db.clone(),
        UpdaterConfig {
            updater: config.updater_address,
            poll_interval: config.poll_interval,
            max_blocks_per_update: config.max_blocks_per_update,
            confirmation_depth: config.confirmation_depth,
        },
        last_done,
    );
    tokio::spawn(updater.run(cancel_token.clone(), config.watchdog_max_failures));

    // The assembler gets its own handle to the target chain
    let assembler = ProofAssembler::new(
        ExecutionLayer::with_chain_id(provider, config.auction.target_chain_id),
        config.assembler.clone(),
    );
    start_rpc_server(
        config.rpc_listen_addr,
        RpcContext {
            engine,
            db,
            assembler,
        },
        cancel_token.clone(),
    )
    .await?;

    wait_for_the_termination(cancel_token).await
}

/// The NFT starts in the signer's first account, controlled by
/// `INITIAL_OWNER`.
fn engine_setup(config: &Config) -> Result<EngineSetup, Error> {
    let holder = create_signer(&config.signer_master_secret)?.create_account()?;
    Ok(EngineSetup {
        config: EngineConfig {
            owner: config.owner_address,
            updater: Some(config.updater_address),
            auction: config.auction.clone(),
            initial_owner: holder,
            initial_encumbrance_time: config.initial_encumbrance_time_sec,
        },
        signer: create_signer(&config.signer_master_secret)?,
        controller: config.initial_owner,
    })
}

async fn wait_for_the_termination(
    cancel_token: CancellationToken,
) -> Result<ExecutionStopped, Error> {
    info!("Starting signal handler...");
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to set up SIGTERM handler: {}", e))?;
    let stopped = tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
            cancel_token.cancel();
            // Give tasks a little time to finish
            tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            ExecutionStopped::CloseApp
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            cancel_token.cancel();
            tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            ExecutionStopped::CloseApp
        }
        _ = cancel_token.cancelled() => {
            info!("Shutdown signal received, restarting encumbrance node...");
            // prevent rapid recreation of the node in case of initial error
            tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            ExecutionStopped::RecreateNode
        }
    };
    Ok(stopped)
}
