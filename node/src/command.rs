//! Every state changing policy call runs through [`PolicyCommand`] and is
//! appended to the command log after it succeeds. On start the engine is
//! rebuilt by replaying the log with the clock pinned to each command's
//! original time.

use crate::{Engine, SharedEngine, clock::NodeClock, db::DataBase};
use alloy::primitives::{Address, Bytes, U256};
use anyhow::Error;
use common::{
    proof::InclusionProof,
    signer::LocalDerSigner,
    transaction::{SignedType2Transaction, Type2Transaction},
};
use policy::{EngineConfig, PolicyEngine, auction::TransferClaim, clock::Clock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyCommand {
    #[serde(rename_all = "camelCase")]
    CreateWallet { caller: Address },
    #[serde(rename_all = "camelCase")]
    EnterEncumbrance {
        caller: Address,
        wallet: Address,
        owner: Address,
        expiration: u64,
    },
    #[serde(rename_all = "camelCase")]
    DepositFunds {
        signed_tx: SignedType2Transaction,
        proof: InclusionProof,
        block_number: u64,
    },
    #[serde(rename_all = "camelCase")]
    DepositLocalFunds {
        caller: Address,
        wallet: Address,
        chain_id: u64,
        value: U256,
    },
    #[serde(rename_all = "camelCase")]
    ProveTransactionInclusion {
        signed_tx: SignedType2Transaction,
        proof: InclusionProof,
        block_number: u64,
    },
    #[serde(rename_all = "camelCase")]
    SignTransaction {
        caller: Address,
        wallet: Address,
        transaction: Type2Transaction,
    },
    #[serde(rename_all = "camelCase")]
    PlaceBid {
        caller: Address,
        wallet: Address,
        amount: U256,
    },
    FinalizeAuction,
    #[serde(rename_all = "camelCase")]
    WithdrawBidBalance { caller: Address, wallet: Address },
    #[serde(rename = "signNFTTransferTransaction", rename_all = "camelCase")]
    SignNftTransferTransaction { max_fee_per_gas: u128 },
    #[serde(rename_all = "camelCase")]
    ProvePreviousTransfer {
        signed_tx: SignedType2Transaction,
        proof: Option<(InclusionProof, u64)>,
        claim: TransferClaim,
    },
    #[serde(rename_all = "camelCase")]
    SendCurrentOwnerMessage {
        caller: Address,
        target: Address,
        data: Bytes,
    },
    #[serde(rename_all = "camelCase")]
    UpdateWhitelist {
        caller: Address,
        wallets: Vec<Address>,
        allowed: bool,
    },
    #[serde(rename_all = "camelCase")]
    SetWhitelistEnabled { caller: Address, enabled: bool },
    #[serde(rename_all = "camelCase")]
    SetTrustedFactory { caller: Address, factory: Address },
    #[serde(rename_all = "camelCase")]
    TransferOwnership { caller: Address, new_owner: Address },
    #[serde(rename_all = "camelCase")]
    AcceptOwnership { caller: Address },
}

impl PolicyCommand {
    /// Runs the command against `engine`, returning the call's result as JSON.
    pub fn apply(&self, engine: &mut Engine) -> Result<Value, Error> {
        let output = match self {
            PolicyCommand::CreateWallet { caller } => {
                serde_json::to_value(engine.create_wallet(*caller)?)?
            }
            PolicyCommand::EnterEncumbrance {
                caller,
                wallet,
                owner,
                expiration,
            } => {
                engine.enter_encumbrance(*caller, *wallet, *owner, *expiration)?;
                Value::Null
            }
            PolicyCommand::DepositFunds {
                signed_tx,
                proof,
                block_number,
            } => serde_json::to_value(engine.deposit_funds(signed_tx, proof, *block_number)?)?,
            PolicyCommand::DepositLocalFunds {
                caller,
                wallet,
                chain_id,
                value,
            } => serde_json::to_value(
                engine.deposit_local_funds(*caller, *wallet, *chain_id, *value)?,
            )?,
            PolicyCommand::ProveTransactionInclusion {
                signed_tx,
                proof,
                block_number,
            } => serde_json::to_value(
                engine.prove_transaction_inclusion(signed_tx, proof, *block_number)?,
            )?,
            PolicyCommand::SignTransaction {
                caller,
                wallet,
                transaction,
            } => serde_json::to_value(engine.sign_transaction(
                *caller,
                *wallet,
                transaction.clone(),
            )?)?,
            PolicyCommand::PlaceBid {
                caller,
                wallet,
                amount,
            } => serde_json::to_value(
                engine.place_bid_from_local_balance(*caller, *wallet, *amount)?,
            )?,
            PolicyCommand::FinalizeAuction => serde_json::to_value(engine.finalize_auction()?)?,
            PolicyCommand::WithdrawBidBalance { caller, wallet } => {
                serde_json::to_value(engine.withdraw_bid_balance_to_local(*caller, *wallet)?)?
            }
            PolicyCommand::SignNftTransferTransaction { max_fee_per_gas } => {
                serde_json::to_value(engine.sign_nft_transfer_transaction(*max_fee_per_gas)?)?
            }
            PolicyCommand::ProvePreviousTransfer {
                signed_tx,
                proof,
                claim,
            } => {
                let proof = proof
                    .as_ref()
                    .map(|(proof, block_number)| (proof, *block_number));
                engine.prove_previous_transfer(signed_tx, proof, *claim)?;
                Value::Null
            }
            PolicyCommand::SendCurrentOwnerMessage {
                caller,
                target,
                data,
            } => {
                engine.send_current_owner_message(*caller, *target, data.clone())?;
                Value::Null
            }
            PolicyCommand::UpdateWhitelist {
                caller,
                wallets,
                allowed,
            } => {
                engine.update_whitelist(*caller, wallets, *allowed)?;
                Value::Null
            }
            PolicyCommand::SetWhitelistEnabled { caller, enabled } => {
                engine.set_whitelist_enabled(*caller, *enabled)?;
                Value::Null
            }
            PolicyCommand::SetTrustedFactory { caller, factory } => {
                engine.set_trusted_factory(*caller, *factory)?;
                Value::Null
            }
            PolicyCommand::TransferOwnership { caller, new_owner } => {
                engine.transfer_ownership(*caller, *new_owner)?;
                Value::Null
            }
            PolicyCommand::AcceptOwnership { caller } => {
                engine.accept_ownership(*caller)?;
                Value::Null
            }
        };
        Ok(output)
    }
}

/// Applies `command` and appends it to the log while holding the engine
/// lock, so the log order is the execution order.
pub async fn execute(
    engine: &SharedEngine,
    db: &DataBase,
    command: PolicyCommand,
) -> Result<Value, Error> {
    let mut engine = engine.lock().await;
    let executed_at = engine.now();
    let output = command.apply(&mut engine)?;
    let encoded = serde_json::to_string(&command)?;
    db.append_command(executed_at, &encoded).await.map_err(|e| {
        error!("Command applied but not logged, state will diverge on restart: {}", e);
        e
    })?;
    Ok(output)
}

/// Inputs the engine is built from before the log is replayed.
pub struct EngineSetup {
    pub config: EngineConfig,
    pub signer: LocalDerSigner,
    /// Controller of the wallet created for `config.initial_owner`.
    pub controller: Address,
}

/// Rebuilds the engine from the stored block hashes and the command log.
/// An empty log starts a fresh policy whose first command creates the NFT
/// holder wallet.
pub async fn restore_engine(setup: EngineSetup, db: &DataBase) -> Result<Engine, Error> {
    let log = db.get_commands().await?;
    let clock = NodeClock::default();
    let genesis = match log.first() {
        Some(record) => record.executed_at,
        None => NodeClock::default().unix_now(),
    };
    clock.pin(genesis);

    let holder = setup.config.initial_owner;
    let hash_writer = setup.config.updater.unwrap_or(setup.config.owner);
    let mut engine = PolicyEngine::new(setup.config, clock.clone(), setup.signer)
        .map_err(|e| anyhow::anyhow!("Failed to create policy engine: {}", e))?;

    let stored = db.get_block_hashes().await?;
    if !stored.is_empty() {
        let restored = engine
            .set_multiple_block_hashes(hash_writer, &stored)
            .map_err(|e| anyhow::anyhow!("Failed to restore stored block hashes: {}", e))?;
        info!("Restored {} block hashes", restored);
    }

    if log.is_empty() {
        let command = PolicyCommand::CreateWallet {
            caller: setup.controller,
        };
        command
            .apply(&mut engine)
            .map_err(|e| anyhow::anyhow!("Failed to create NFT holder wallet: {}", e))?;
        db.append_command(genesis, &serde_json::to_string(&command)?)
            .await?;
    } else {
        for record in &log {
            clock.pin(record.executed_at);
            let command: PolicyCommand = serde_json::from_str(&record.command)
                .map_err(|e| anyhow::anyhow!("Command {} is unreadable: {}", record.id, e))?;
            command
                .apply(&mut engine)
                .map_err(|e| anyhow::anyhow!("Failed to replay command {}: {}", record.id, e))?;
        }
        info!("Replayed {} policy commands", log.len());
    }
    clock.unpin();

    let wallet = engine
        .wallets()
        .get(holder)
        .map_err(|e| anyhow::anyhow!("NFT holder wallet {} missing: {}", holder, e))?;
    info!(
        "NFT holder wallet {} controlled by {}, encumbered until {}",
        wallet.address, wallet.owner, wallet.encumbrance_expiration
    );
    Ok(engine)
}
