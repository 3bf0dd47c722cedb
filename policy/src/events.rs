use crate::inclusion::AcceptedInclusion;
use alloy::primitives::{Address, B256, Bytes, U256};
use serde::Serialize;

/// State changes observable by clients, in the order they were applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PolicyEvent {
    #[serde(rename_all = "camelCase")]
    BlockHashSet {
        block_number: u64,
        block_hash: B256,
    },
    #[serde(rename_all = "camelCase")]
    WalletEncumbered {
        wallet: Address,
        owner: Address,
        encumbrance_expiration: u64,
    },
    #[serde(rename_all = "camelCase")]
    DepositCredited {
        wallet: Address,
        chain_id: u64,
        amount: U256,
        transaction_hash: B256,
    },
    #[serde(rename_all = "camelCase")]
    LocalDeposit {
        wallet: Address,
        chain_id: u64,
        amount: U256,
    },
    InclusionAccepted(AcceptedInclusion),
    #[serde(rename_all = "camelCase")]
    TransactionSigned {
        wallet: Address,
        nonce: u64,
        transaction_hash: B256,
    },
    #[serde(rename_all = "camelCase")]
    BidPlaced {
        wallet: Address,
        amount: U256,
        bid_balance: U256,
    },
    #[serde(rename_all = "camelCase")]
    AuctionFinalized {
        winner: Option<Address>,
        price: U256,
        next_auction_start: u64,
    },
    #[serde(rename_all = "camelCase")]
    BidBalanceWithdrawn {
        wallet: Address,
        amount: U256,
    },
    #[serde(rename_all = "camelCase")]
    PreviousOwnerProven {
        previous_owner: Address,
        new_owner: Address,
        nonce: u64,
    },
    #[serde(rename_all = "camelCase")]
    CurrentOwnerMessage {
        owner: Address,
        target: Address,
        data: Bytes,
    },
    #[serde(rename_all = "camelCase")]
    OwnershipTransferred {
        previous_owner: Address,
        new_owner: Address,
    },
}
