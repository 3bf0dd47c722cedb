use crate::{
    SharedEngine,
    command::{PolicyCommand, execute},
    db::DataBase,
};
use alloy::primitives::{Address, B256, Bytes, U256};
use anyhow::Error;
use common::{
    execution_layer::ExecutionLayer,
    proof::{InclusionProof, ProofAssembler},
    signature::SignedRequest,
    transaction::{SignedType2Transaction, Type2Transaction},
};
use jsonrpsee::{
    server::{RpcModule, ServerBuilder},
    types::{ErrorCode, ErrorObjectOwned, Params},
};
use policy::auction::TransferClaim;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use std::{fmt::Display, net::SocketAddr};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Error code for requests whose signature, caller or nonce is refused.
pub const UNAUTHORIZED_CODE: i32 = -32001;

pub struct RpcContext {
    pub engine: SharedEngine,
    pub db: DataBase,
    pub assembler: ProofAssembler<ExecutionLayer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvePreviousTransferParams {
    signed_tx: SignedType2Transaction,
    proof: Option<InclusionProof>,
    block_number: Option<u64>,
    claimed_nonce: u64,
    new_owner: Address,
    tx_nonce: u64,
    max_fee_per_gas: u128,
}

fn call_failed(e: impl Display) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(-32000, "Policy call failed", Some(e.to_string()))
}

fn unauthorized(e: impl Display) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(UNAUTHORIZED_CODE, "Unauthorized", Some(e.to_string()))
}

/// Resolves the caller of a [`SignedRequest`], burns its nonce and decodes
/// the payload.
async fn authenticate<P: DeserializeOwned>(
    ctx: &RpcContext,
    method: &str,
    params: Params<'static>,
) -> Result<(Address, P), ErrorObjectOwned> {
    let (request,): (SignedRequest,) = params.parse()?;
    let caller = request.verify(method).map_err(|e| {
        warn!("Refused {} claiming caller {}: {}", method, request.caller, e);
        unauthorized(e)
    })?;
    let payload = serde_json::from_str(&request.payload).map_err(|e| {
        ErrorObjectOwned::owned(
            ErrorCode::InvalidParams.code(),
            "Invalid request payload",
            Some(e.to_string()),
        )
    })?;
    let fresh = ctx
        .db
        .consume_request_nonce(caller, request.nonce)
        .await
        .map_err(call_failed)?;
    if !fresh {
        return Err(unauthorized(format!(
            "nonce {} of {} was already used",
            request.nonce, caller
        )));
    }
    Ok((caller, payload))
}

async fn run(ctx: &RpcContext, command: PolicyCommand) -> Result<Value, ErrorObjectOwned> {
    execute(&ctx.engine, &ctx.db, command)
        .await
        .map_err(call_failed)
}

/// Registers a method taking a single [`SignedRequest`] whose payload `P`
/// becomes a logged command on behalf of the recovered caller.
fn register_signed<P, F>(
    module: &mut RpcModule<RpcContext>,
    method: &'static str,
    command: F,
) -> Result<(), Error>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(Address, P) -> PolicyCommand + Clone + Send + Sync + 'static,
{
    module.register_async_method(method, move |params, ctx, _| {
        let command = command.clone();
        async move {
            let (caller, payload) = authenticate::<P>(&ctx, method, params).await?;
            run(&ctx, command(caller, payload)).await
        }
    })?;
    Ok(())
}

pub fn build_module(ctx: RpcContext) -> Result<RpcModule<RpcContext>, Error> {
    let mut module = RpcModule::new(ctx);

    // Block hash oracle

    module.register_async_method("encumbrance_getBlockHash", |params, ctx, _| async move {
        let (block_number,): (u64,) = params.parse()?;
        Ok::<B256, ErrorObjectOwned>(ctx.engine.lock().await.get_block_hash(block_number))
    })?;

    module.register_async_method("encumbrance_setBlockHash", |params, ctx, _| async move {
        let (caller, (block_number, block_hash)): (Address, (u64, B256)) =
            authenticate(&ctx, "encumbrance_setBlockHash", params).await?;
        let written = ctx
            .engine
            .lock()
            .await
            .set_block_hash(caller, block_number, block_hash)
            .map_err(call_failed)?;
        if written {
            ctx.db
                .store_block_hashes(&[(block_number, block_hash)])
                .await
                .map_err(call_failed)?;
        }
        Ok::<bool, ErrorObjectOwned>(written)
    })?;

    module.register_async_method(
        "encumbrance_setMultipleBlockHashes",
        |params, ctx, _| async move {
            let (caller, (entries,)): (Address, (Vec<(u64, B256)>,)) =
                authenticate(&ctx, "encumbrance_setMultipleBlockHashes", params).await?;
            let written = ctx
                .engine
                .lock()
                .await
                .set_multiple_block_hashes(caller, &entries)
                .map_err(call_failed)?;
            ctx.db
                .store_block_hashes(&entries)
                .await
                .map_err(call_failed)?;
            Ok::<_, ErrorObjectOwned>(written)
        },
    )?;

    // Administration

    register_signed(
        &mut module,
        "encumbrance_transferOwnership",
        |caller, (new_owner,): (Address,)| PolicyCommand::TransferOwnership { caller, new_owner },
    )?;
    register_signed(
        &mut module,
        "encumbrance_acceptOwnership",
        |caller, (): ()| PolicyCommand::AcceptOwnership { caller },
    )?;
    register_signed(
        &mut module,
        "encumbrance_setTrustedFactory",
        |caller, (factory,): (Address,)| PolicyCommand::SetTrustedFactory { caller, factory },
    )?;
    register_signed(
        &mut module,
        "encumbrance_updateWhitelist",
        |caller, (wallets, allowed): (Vec<Address>, bool)| PolicyCommand::UpdateWhitelist {
            caller,
            wallets,
            allowed,
        },
    )?;
    register_signed(
        &mut module,
        "encumbrance_setWhitelistEnabled",
        |caller, (enabled,): (bool,)| PolicyCommand::SetWhitelistEnabled { caller, enabled },
    )?;

    // Wallets and transaction policy

    register_signed(
        &mut module,
        "encumbrance_createWallet",
        |caller, (): ()| PolicyCommand::CreateWallet { caller },
    )?;
    register_signed(
        &mut module,
        "encumbrance_enterEncumbrance",
        |caller, (wallet, owner, expiration): (Address, Address, u64)| {
            PolicyCommand::EnterEncumbrance {
                caller,
                wallet,
                owner,
                expiration,
            }
        },
    )?;

    module.register_async_method("encumbrance_depositFunds", |params, ctx, _| async move {
        let (signed_tx, proof, block_number): (SignedType2Transaction, InclusionProof, u64) =
            params.parse()?;
        run(
            &ctx,
            PolicyCommand::DepositFunds {
                signed_tx,
                proof,
                block_number,
            },
        )
        .await
    })?;

    register_signed(
        &mut module,
        "encumbrance_depositLocalFunds",
        |caller, (wallet, chain_id, value): (Address, u64, U256)| {
            PolicyCommand::DepositLocalFunds {
                caller,
                wallet,
                chain_id,
                value,
            }
        },
    )?;

    module.register_async_method("encumbrance_getEthBalance", |params, ctx, _| async move {
        let (wallet, chain_id): (Address, u64) = params.parse()?;
        Ok::<U256, ErrorObjectOwned>(ctx.engine.lock().await.eth_balance(wallet, chain_id))
    })?;

    module.register_async_method(
        "encumbrance_getSubpolicyLocalBalance",
        |params, ctx, _| async move {
            let (wallet, chain_id): (Address, u64) = params.parse()?;
            Ok::<U256, ErrorObjectOwned>(ctx.engine.lock().await.local_balance(wallet, chain_id))
        },
    )?;

    module.register_async_method(
        "encumbrance_proveTransactionInclusion",
        |params, ctx, _| async move {
            let (signed_tx, proof, block_number): (SignedType2Transaction, InclusionProof, u64) =
                params.parse()?;
            run(
                &ctx,
                PolicyCommand::ProveTransactionInclusion {
                    signed_tx,
                    proof,
                    block_number,
                },
            )
            .await
        },
    )?;

    register_signed(
        &mut module,
        "encumbrance_signTransaction",
        |caller, (wallet, transaction): (Address, Type2Transaction)| {
            PolicyCommand::SignTransaction {
                caller,
                wallet,
                transaction,
            }
        },
    )?;

    // Auction

    register_signed(
        &mut module,
        "encumbrance_placeBid",
        |caller, (wallet, amount): (Address, U256)| PolicyCommand::PlaceBid {
            caller,
            wallet,
            amount,
        },
    )?;

    module.register_async_method("encumbrance_finalizeAuction", |_, ctx, _| async move {
        run(&ctx, PolicyCommand::FinalizeAuction).await
    })?;

    register_signed(
        &mut module,
        "encumbrance_withdrawBidBalance",
        |caller, (wallet,): (Address,)| PolicyCommand::WithdrawBidBalance { caller, wallet },
    )?;

    module.register_async_method("encumbrance_getBidBalance", |params, ctx, _| async move {
        let (wallet,): (Address,) = params.parse()?;
        Ok::<U256, ErrorObjectOwned>(ctx.engine.lock().await.bid_balance(wallet))
    })?;

    module.register_async_method("encumbrance_currentOwner", |_, ctx, _| async move {
        Ok::<Address, ErrorObjectOwned>(ctx.engine.lock().await.current_owner())
    })?;

    module.register_async_method("encumbrance_previousOwner", |_, ctx, _| async move {
        Ok::<Address, ErrorObjectOwned>(ctx.engine.lock().await.previous_owner())
    })?;

    module.register_async_method("encumbrance_nextAuctionEnd", |_, ctx, _| async move {
        Ok::<u64, ErrorObjectOwned>(ctx.engine.lock().await.next_auction_end())
    })?;

    module.register_async_method(
        "encumbrance_getNFTTransferTransaction",
        |params, ctx, _| async move {
            let (max_fee_per_gas, new_owner, nonce): (u128, Address, u64) = params.parse()?;
            Ok::<Type2Transaction, ErrorObjectOwned>(
                ctx.engine
                    .lock()
                    .await
                    .nft_transfer_transaction(max_fee_per_gas, new_owner, nonce),
            )
        },
    )?;

    module.register_async_method(
        "encumbrance_signNFTTransferTransaction",
        |params, ctx, _| async move {
            let (max_fee_per_gas,): (u128,) = params.parse()?;
            run(
                &ctx,
                PolicyCommand::SignNftTransferTransaction { max_fee_per_gas },
            )
            .await
        },
    )?;

    module.register_async_method(
        "encumbrance_provePreviousTransfer",
        |params, ctx, _| async move {
            let (request,): (ProvePreviousTransferParams,) = params.parse()?;
            let proof = match (request.proof, request.block_number) {
                (Some(proof), Some(block_number)) => Some((proof, block_number)),
                (None, _) => None,
                (Some(_), None) => {
                    return Err(call_failed("blockNumber is required with a proof"));
                }
            };
            let claim = TransferClaim {
                claimed_nonce: request.claimed_nonce,
                new_owner: request.new_owner,
                tx_nonce: request.tx_nonce,
                max_fee_per_gas: request.max_fee_per_gas,
            };
            run(
                &ctx,
                PolicyCommand::ProvePreviousTransfer {
                    signed_tx: request.signed_tx,
                    proof,
                    claim,
                },
            )
            .await
        },
    )?;

    register_signed(
        &mut module,
        "encumbrance_sendCurrentOwnerMessage",
        |caller, (target, data): (Address, Bytes)| PolicyCommand::SendCurrentOwnerMessage {
            caller,
            target,
            data,
        },
    )?;

    module.register_async_method("encumbrance_events", |params, ctx, _| async move {
        let (from,): (usize,) = params.parse()?;
        Ok::<_, ErrorObjectOwned>(ctx.engine.lock().await.events_since(from).to_vec())
    })?;

    // Proof assembly against the target chain

    module.register_async_method("encumbrance_assembleProof", |params, ctx, _| async move {
        let (tx_hash,): (B256,) = params.parse()?;
        ctx.assembler.assemble(tx_hash).await.map_err(|e| {
            warn!("Proof assembly for {} failed: {}", tx_hash, e);
            call_failed(e)
        })
    })?;

    Ok(module)
}

pub async fn start_rpc_server(
    addr: SocketAddr,
    ctx: RpcContext,
    cancel_token: CancellationToken,
) -> Result<(), Error> {
    let server = ServerBuilder::default()
        .build(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to build RPC server: {}", e))?;

    let module = build_module(ctx)?;

    info!("Policy RPC server starting on {}", addr);
    let handle = server.start(module);

    tokio::spawn(async move {
        cancel_token.cancelled().await;
        info!("Cancellation token triggered, stopping policy RPC server");
        handle.stop().ok();
    });

    Ok(())
}
