//! Sealed-bid second-price auction over the right to hold one NFT.
//!
//! Encumbered wallets bid with escrowed balances. Once the ownership window
//! has passed, the highest bidder becomes the current owner and pays the
//! second-highest bid. The NFT itself only moves on the target chain after
//! the previous owner's wallet signs a `transferFrom`, and that transfer is
//! proven back with an inclusion proof.

mod bid;

pub use bid::{Bid, BidBook};

use crate::error::PolicyError;
use alloy::{
    primitives::{Address, U256},
    sol,
    sol_types::SolCall,
};
use common::transaction::{SignedType2Transaction, Type2Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

sol! {
    interface IERC721 {
        function transferFrom(address from, address to, uint256 tokenId) external;
    }
}

pub const NFT_TRANSFER_GAS_LIMIT: u64 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionConfig {
    pub nft_contract: Address,
    pub token_id: U256,
    pub target_chain_id: u64,
    /// Seconds a winner holds the NFT before the next auction may finalize.
    pub min_ownership_time: u64,
    /// Bidding wallets must stay encumbered at least this long.
    pub min_encumbrance_time_left: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, Serialize)]
pub enum AuctionPhase {
    Open,
    AwaitingFinalization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionOutcome {
    /// `None` when the window closed without bids.
    pub winner: Option<Address>,
    pub price: U256,
    pub next_auction_start: u64,
}

/// What the caller claims a proven transaction did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferClaim {
    /// Nonce under which the inclusion was accepted.
    pub claimed_nonce: u64,
    pub new_owner: Address,
    pub tx_nonce: u64,
    pub max_fee_per_gas: u128,
}

#[derive(Debug, Clone)]
pub struct AuctionPolicy {
    config: AuctionConfig,
    current_owner: Address,
    previous_proven_owner: Address,
    auction_start_time: u64,
    bid_balances: HashMap<Address, U256>,
    book: BidBook,
    last_paid: U256,
    proceeds: U256,
    whitelist: HashSet<Address>,
    whitelist_enabled: bool,
    escrowed_transfer: Option<SignedType2Transaction>,
}

impl AuctionPolicy {
    /// `initial_owner` holds the NFT on the target chain at start.
    pub fn new(config: AuctionConfig, initial_owner: Address, now: u64) -> Self {
        Self {
            config,
            current_owner: initial_owner,
            previous_proven_owner: initial_owner,
            auction_start_time: now,
            bid_balances: HashMap::new(),
            book: BidBook::default(),
            last_paid: U256::ZERO,
            proceeds: U256::ZERO,
            whitelist: HashSet::new(),
            whitelist_enabled: false,
            escrowed_transfer: None,
        }
    }

    pub fn config(&self) -> &AuctionConfig {
        &self.config
    }

    pub fn current_owner(&self) -> Address {
        self.current_owner
    }

    pub fn previous_proven_owner(&self) -> Address {
        self.previous_proven_owner
    }

    pub fn auction_start_time(&self) -> u64 {
        self.auction_start_time
    }

    pub fn min_ownership_time(&self) -> u64 {
        self.config.min_ownership_time
    }

    pub fn next_auction_end(&self) -> u64 {
        self.auction_start_time
            .saturating_add(self.config.min_ownership_time)
    }

    pub fn phase(&self, now: u64) -> AuctionPhase {
        if now >= self.next_auction_end() {
            AuctionPhase::AwaitingFinalization
        } else {
            AuctionPhase::Open
        }
    }

    pub fn bid_balance(&self, wallet: Address) -> U256 {
        self.bid_balances.get(&wallet).copied().unwrap_or_default()
    }

    pub fn committed_bid(&self, wallet: Address) -> U256 {
        self.book.committed(wallet)
    }

    pub fn highest_bid(&self) -> Option<Bid> {
        self.book.highest()
    }

    pub fn second_highest_bid(&self) -> Option<Bid> {
        self.book.second_highest()
    }

    pub fn last_paid(&self) -> U256 {
        self.last_paid
    }

    pub fn proceeds(&self) -> U256 {
        self.proceeds
    }

    pub fn escrowed_transfer(&self) -> Option<&SignedType2Transaction> {
        self.escrowed_transfer.as_ref()
    }

    /// The NFT still has to move from the previous proven owner.
    pub fn transfer_pending(&self) -> bool {
        self.previous_proven_owner != self.current_owner
    }

    pub fn is_whitelisted(&self, wallet: Address) -> bool {
        self.whitelist.contains(&wallet)
    }

    pub fn whitelist_enabled(&self) -> bool {
        self.whitelist_enabled
    }

    pub fn update_whitelist(&mut self, wallets: &[Address], allowed: bool) {
        for wallet in wallets {
            if allowed {
                self.whitelist.insert(*wallet);
            } else {
                self.whitelist.remove(wallet);
            }
        }
    }

    pub fn set_whitelist_enabled(&mut self, enabled: bool) {
        self.whitelist_enabled = enabled;
    }

    /// Escrows `value` for `wallet` and commits it to `amount`. Returns the
    /// wallet's new bid balance.
    pub fn place_bid(
        &mut self,
        wallet: Address,
        amount: U256,
        value: U256,
        encumbrance_time_left: u64,
    ) -> Result<U256, PolicyError> {
        if amount.is_zero() {
            return Err(PolicyError::ZeroBid(wallet));
        }
        if self.whitelist_enabled && !self.whitelist.contains(&wallet) {
            return Err(PolicyError::NotWhitelisted(wallet));
        }
        if encumbrance_time_left < self.config.min_encumbrance_time_left {
            return Err(PolicyError::NotEnoughEncumbranceTimeLeft {
                time_left: encumbrance_time_left,
                required: self.config.min_encumbrance_time_left,
            });
        }
        let balance = self.bid_balance(wallet).saturating_add(value);
        if amount > balance {
            return Err(PolicyError::BidExceedsBalance {
                bid: amount,
                balance,
            });
        }
        let committed = self.book.committed(wallet);
        if amount < committed {
            return Err(PolicyError::BidBelowBalance {
                bid: amount,
                committed,
            });
        }

        self.bid_balances.insert(wallet, balance);
        self.book.place(wallet, amount);
        debug!("Bid of {} placed for wallet {}", amount, wallet);
        Ok(balance)
    }

    /// Closes the current window. The winner pays the second-highest bid,
    /// or its own bid when it was the only bidder.
    pub fn finalize(&mut self, now: u64) -> Result<AuctionOutcome, PolicyError> {
        let ends_at = self.next_auction_end();
        if now < ends_at {
            return Err(PolicyError::AuctionNotYetFinalizable { now, ends_at });
        }

        let ranked = self.book.ranked();
        let outcome = match ranked.first() {
            None => AuctionOutcome {
                winner: None,
                price: U256::ZERO,
                next_auction_start: now,
            },
            Some(winner) => {
                let price = ranked.get(1).map_or(winner.amount, |second| second.amount);
                let balance = self.bid_balance(winner.wallet);
                self.bid_balances
                    .insert(winner.wallet, balance.saturating_sub(price));
                self.last_paid = price;
                self.proceeds = self.proceeds.saturating_add(price);
                self.current_owner = winner.wallet;
                AuctionOutcome {
                    winner: Some(winner.wallet),
                    price,
                    next_auction_start: now,
                }
            }
        };

        self.book.clear();
        self.auction_start_time = now;
        Ok(outcome)
    }

    /// Pays out whatever is not committed to a running bid. Returns the
    /// amount released, zero when there is nothing left.
    pub fn withdraw_bid_balance(&mut self, wallet: Address) -> U256 {
        let balance = self.bid_balance(wallet);
        let committed = self.book.committed(wallet);
        let released = balance.saturating_sub(committed);
        if !released.is_zero() {
            self.bid_balances.insert(wallet, committed);
        }
        released
    }

    /// `transferFrom(previousProvenOwner, newOwner, tokenId)` as sent by the
    /// previous owner's wallet.
    pub fn nft_transfer_transaction(
        &self,
        max_fee_per_gas: u128,
        new_owner: Address,
        nonce: u64,
    ) -> Type2Transaction {
        let call = IERC721::transferFromCall {
            from: self.previous_proven_owner,
            to: new_owner,
            tokenId: self.config.token_id,
        };
        Type2Transaction {
            chain_id: self.config.target_chain_id,
            nonce,
            max_priority_fee_per_gas: max_fee_per_gas,
            max_fee_per_gas,
            gas_limit: NFT_TRANSFER_GAS_LIMIT,
            destination: self.config.nft_contract,
            amount: U256::ZERO,
            payload: call.abi_encode().into(),
        }
    }

    pub fn escrow_transfer(&mut self, signed: SignedType2Transaction) {
        self.escrowed_transfer = Some(signed);
    }

    /// `sender` is the recovered signer of `signed`.
    pub fn check_previous_transfer(
        &self,
        signed: &SignedType2Transaction,
        sender: Address,
        claim: &TransferClaim,
    ) -> Result<(), PolicyError> {
        if sender != self.previous_proven_owner {
            return Err(PolicyError::UnexpectedSender {
                expected: self.previous_proven_owner,
                actual: sender,
            });
        }
        if claim.claimed_nonce != signed.transaction.nonce {
            return Err(PolicyError::UnexpectedTransfer(format!(
                "claimed nonce {} but transaction has nonce {}",
                claim.claimed_nonce, signed.transaction.nonce
            )));
        }
        let expected =
            self.nft_transfer_transaction(claim.max_fee_per_gas, claim.new_owner, claim.tx_nonce);
        if signed.transaction != expected {
            return Err(PolicyError::UnexpectedTransfer(format!(
                "transaction is not the transfer of token {} to {}",
                self.config.token_id, claim.new_owner
            )));
        }
        Ok(())
    }

    pub fn commit_previous_transfer(&mut self, new_owner: Address) {
        self.previous_proven_owner = new_owner;
        self.escrowed_transfer = None;
    }

    /// Admin override for a transfer that happened outside the policy.
    pub fn set_previous_proven_owner(&mut self, owner: Address) {
        self.previous_proven_owner = owner;
        self.escrowed_transfer = None;
    }
}
