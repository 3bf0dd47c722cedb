use alloy::primitives::{Address, U256};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub wallet: Address,
    pub amount: U256,
    /// Order in which the bid reached its current amount. Breaks ties.
    pub sequence: u64,
}

/// Sealed bids of the running auction, one per wallet.
#[derive(Debug, Clone, Default)]
pub struct BidBook {
    bids: HashMap<Address, Bid>,
    next_sequence: u64,
}

impl BidBook {
    pub fn committed(&self, wallet: Address) -> U256 {
        self.bids
            .get(&wallet)
            .map(|bid| bid.amount)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }

    /// Raising a bid moves it behind every bid already at the new amount.
    pub fn place(&mut self, wallet: Address, amount: U256) {
        let sequence = self.next_sequence;
        let bid = self.bids.entry(wallet).or_insert(Bid {
            wallet,
            amount,
            sequence,
        });
        if bid.sequence == sequence || bid.amount != amount {
            bid.amount = amount;
            bid.sequence = sequence;
            self.next_sequence = self.next_sequence.saturating_add(1);
        }
    }

    /// Bids from best to worst: higher amount first, earlier bid on a tie.
    pub fn ranked(&self) -> Vec<Bid> {
        let mut ranked: Vec<Bid> = self.bids.values().copied().collect();
        ranked.sort_by(|a, b| {
            b.amount
                .cmp(&a.amount)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        ranked
    }

    pub fn highest(&self) -> Option<Bid> {
        self.ranked().first().copied()
    }

    pub fn second_highest(&self) -> Option<Bid> {
        self.ranked().get(1).copied()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
    }
}
