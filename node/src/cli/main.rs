use alloy::primitives::{Address, B256};
use anyhow::Error;
use clap::{Parser, Subcommand};
use common::{
    execution_layer::ExecutionLayer,
    proof::{AssemblerConfig, ProofAssembler},
    shared::alloy_tools::create_alloy_provider_without_wallet,
    signature::{PayloadMode, SignedRequest, der_to_eth_signature, parse_der, recover_candidates},
};
use jsonrpsee::{core::client::ClientT, http_client::HttpClientBuilder, rpc_params};
use k256::ecdsa::SigningKey;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "proof-cli", version, about = "Inclusion proof and signature tooling")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble the inclusion proof of a mined transaction and print it as JSON.
    Assemble {
        #[arg(long, env = "TARGET_RPC_URL")]
        rpc_url: String,
        #[arg(long)]
        tx_hash: B256,
        #[arg(long, default_value_t = 5)]
        max_attempts: u32,
        #[arg(long, default_value_t = 500)]
        backoff_ms: u64,
    },
    /// Compare the chain's hash of a block with the one the policy node stores.
    BlockHash {
        #[arg(long, env = "TARGET_RPC_URL")]
        rpc_url: String,
        #[arg(long, default_value = "http://127.0.0.1:8547")]
        node_url: String,
        #[arg(long)]
        number: u64,
    },
    /// Sign a request and send it to a node method that authenticates its caller.
    Call {
        #[arg(long, default_value = "http://127.0.0.1:8547")]
        node_url: String,
        /// For example encumbrance_placeBid
        #[arg(long)]
        method: String,
        /// JSON encoded method parameters, for example '["0x..", "0x3c"]'
        #[arg(long, default_value = "null")]
        payload: String,
        /// Hex encoded private key of the caller
        #[arg(long, env = "CALLER_PRIVATE_KEY")]
        private_key: String,
        /// Defaults to the current unix time in milliseconds
        #[arg(long)]
        nonce: Option<u64>,
    },
    /// Turn a DER signature into an Ethereum (r, s, v) signature.
    Recover {
        /// Hex encoded DER signature
        #[arg(long)]
        der: String,
        /// Hex encoded payload, interpreted according to `mode`
        #[arg(long)]
        payload: String,
        /// bytes, message, digest or typed-data
        #[arg(long, default_value = "bytes")]
        mode: PayloadMode,
        /// Signer the recovery id must resolve to. Without it every candidate is listed.
        #[arg(long)]
        expected: Option<Address>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();
    common::utils::logging::init_cli_logging()?;

    match Args::parse().command {
        Command::Assemble {
            rpc_url,
            tx_hash,
            max_attempts,
            backoff_ms,
        } => assemble(&rpc_url, tx_hash, max_attempts, backoff_ms).await,
        Command::BlockHash {
            rpc_url,
            node_url,
            number,
        } => block_hash(&rpc_url, &node_url, number).await,
        Command::Call {
            node_url,
            method,
            payload,
            private_key,
            nonce,
        } => call(&node_url, &method, payload, &private_key, nonce).await,
        Command::Recover {
            der,
            payload,
            mode,
            expected,
        } => recover(&der, &payload, mode, expected),
    }
}

async fn assemble(
    rpc_url: &str,
    tx_hash: B256,
    max_attempts: u32,
    backoff_ms: u64,
) -> Result<(), Error> {
    let provider = create_alloy_provider_without_wallet(rpc_url).await?;
    let execution_layer = ExecutionLayer::new(provider).await?;
    let assembler = ProofAssembler::new(
        execution_layer,
        AssemblerConfig {
            max_attempts,
            backoff_ms,
        },
    );

    let assembled = assembler
        .assemble(tx_hash)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to assemble proof for {}: {}", tx_hash, e))?;
    info!(
        "Assembled proof for {} in block {} at index {}",
        tx_hash, assembled.block_number, assembled.transaction_index
    );
    println!("{}", serde_json::to_string_pretty(&assembled)?);
    Ok(())
}

async fn block_hash(rpc_url: &str, node_url: &str, number: u64) -> Result<(), Error> {
    let provider = create_alloy_provider_without_wallet(rpc_url).await?;
    let chain_hash = ExecutionLayer::new(provider)
        .await?
        .get_block_hash(number)
        .await?;

    let client = HttpClientBuilder::default()
        .build(node_url)
        .map_err(|e| anyhow::anyhow!("Failed to create client for {}: {}", node_url, e))?;
    let node_hash: B256 = client
        .request("encumbrance_getBlockHash", rpc_params![number])
        .await
        .map_err(|e| anyhow::anyhow!("Failed to query block hash from {}: {}", node_url, e))?;

    println!("chain: {chain_hash}");
    println!("node:  {node_hash}");
    if node_hash.is_zero() {
        warn!("Block {} is not known to the policy node yet", number);
    } else if node_hash != chain_hash {
        return Err(anyhow::anyhow!(
            "Block {} hash mismatch: chain {}, node {}",
            number,
            chain_hash,
            node_hash
        ));
    }
    Ok(())
}

async fn call(
    node_url: &str,
    method: &str,
    payload: String,
    private_key: &str,
    nonce: Option<u64>,
) -> Result<(), Error> {
    serde_json::from_str::<serde_json::Value>(&payload)
        .map_err(|e| anyhow::anyhow!("Payload is not JSON: {}", e))?;
    let key = hex::decode(private_key.trim_start_matches("0x"))
        .map_err(|e| anyhow::anyhow!("Private key is not hex: {}", e))?;
    let key = SigningKey::from_slice(&key)
        .map_err(|e| anyhow::anyhow!("Invalid private key: {}", e))?;
    let nonce = match nonce {
        Some(nonce) => nonce,
        None => u64::try_from(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis())?,
    };

    let request = SignedRequest::sign(&key, method, nonce, payload)?;
    info!("Calling {} as {} with nonce {}", method, request.caller, nonce);
    let client = HttpClientBuilder::default()
        .build(node_url)
        .map_err(|e| anyhow::anyhow!("Failed to create client for {}: {}", node_url, e))?;
    let result: serde_json::Value = client
        .request(method, rpc_params![request])
        .await
        .map_err(|e| anyhow::anyhow!("{} failed: {}", method, e))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn recover(
    der: &str,
    payload: &str,
    mode: PayloadMode,
    expected: Option<Address>,
) -> Result<(), Error> {
    let der = hex::decode(der.trim_start_matches("0x"))
        .map_err(|e| anyhow::anyhow!("DER signature is not hex: {}", e))?;
    let data = hex::decode(payload.trim_start_matches("0x"))
        .map_err(|e| anyhow::anyhow!("Payload is not hex: {}", e))?;
    let payload = mode.payload(&data)?;

    match expected {
        Some(expected) => {
            let signature = der_to_eth_signature(&der, &payload, expected)?;
            println!("{}", serde_json::to_string_pretty(&signature)?);
            println!("0x{}", hex::encode(signature.to_bytes()));
        }
        None => {
            let (r, s) = parse_der(&der)?;
            for (v, address) in recover_candidates(r, s, &payload)? {
                println!("v={v} signer={address}");
            }
        }
    }
    Ok(())
}
