use crate::{
    error::PolicyError, inclusion::AcceptedInclusion, wallet_registry::WalletRegistry,
};
use alloy::primitives::{Address, B256, U256};
use common::transaction::Type2Transaction;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
struct WalletAccount {
    next_nonce: u64,
    /// Target chain funds proven deposited, keyed by chain id.
    eth_balance: HashMap<u64, U256>,
    /// Policy chain funds set aside to pay for a target chain.
    local_balance: HashMap<u64, U256>,
}

/// Tracks what each encumbered wallet may still sign on the target chains.
///
/// The nonce only advances when a signed transaction is proven included,
/// so at most one transaction per nonce can ever be authorized.
#[derive(Debug, Clone, Default)]
pub struct TransactionPolicy {
    accounts: HashMap<Address, WalletAccount>,
    credited_deposits: HashSet<B256>,
    accepted: HashMap<(Address, u64), AcceptedInclusion>,
}

impl TransactionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_nonce(&self, wallet: Address) -> u64 {
        self.accounts
            .get(&wallet)
            .map(|account| account.next_nonce)
            .unwrap_or_default()
    }

    pub fn eth_balance(&self, wallet: Address, chain_id: u64) -> U256 {
        self.accounts
            .get(&wallet)
            .and_then(|account| account.eth_balance.get(&chain_id))
            .copied()
            .unwrap_or_default()
    }

    pub fn local_balance(&self, wallet: Address, chain_id: u64) -> U256 {
        self.accounts
            .get(&wallet)
            .and_then(|account| account.local_balance.get(&chain_id))
            .copied()
            .unwrap_or_default()
    }

    pub fn accepted_inclusion(&self, wallet: Address, nonce: u64) -> Option<&AcceptedInclusion> {
        self.accepted.get(&(wallet, nonce))
    }

    /// A proven transfer into an encumbered wallet. Each transaction is
    /// credited at most once.
    pub fn check_deposit(
        &self,
        inclusion: &AcceptedInclusion,
        registry: &WalletRegistry,
    ) -> Result<(), PolicyError> {
        registry.get(inclusion.transaction.destination)?;
        if self.credited_deposits.contains(&inclusion.transaction_hash) {
            return Err(PolicyError::DepositAlreadyCredited(
                inclusion.transaction_hash,
            ));
        }
        Ok(())
    }

    pub fn commit_deposit(&mut self, inclusion: &AcceptedInclusion) -> U256 {
        let tx = &inclusion.transaction;
        self.credited_deposits.insert(inclusion.transaction_hash);
        let balance = self
            .accounts
            .entry(tx.destination)
            .or_default()
            .eth_balance
            .entry(tx.chain_id)
            .or_default();
        *balance = balance.saturating_add(tx.amount);
        *balance
    }

    pub fn deposit_local_funds(&mut self, wallet: Address, chain_id: u64, value: U256) -> U256 {
        let balance = self
            .accounts
            .entry(wallet)
            .or_default()
            .local_balance
            .entry(chain_id)
            .or_default();
        *balance = balance.saturating_add(value);
        *balance
    }

    /// Takes `value` out of the local balance, all or nothing.
    pub fn withdraw_local_funds(
        &mut self,
        wallet: Address,
        chain_id: u64,
        value: U256,
    ) -> Result<U256, PolicyError> {
        let available = self.local_balance(wallet, chain_id);
        if value > available {
            return Err(PolicyError::InsufficientBalance {
                required: value,
                available,
            });
        }
        let remaining = available.saturating_sub(value);
        self.accounts
            .entry(wallet)
            .or_default()
            .local_balance
            .insert(chain_id, remaining);
        Ok(remaining)
    }

    /// Whether `wallet` may sign `tx` now: the nonce must be the next
    /// unproven one and the proven balance must cover the worst-case cost.
    pub fn check_signable(
        &self,
        wallet: Address,
        tx: &Type2Transaction,
        registry: &WalletRegistry,
    ) -> Result<(), PolicyError> {
        registry.get(wallet)?;
        let expected = self.next_nonce(wallet);
        if tx.nonce != expected {
            return Err(PolicyError::NonceMismatch {
                wallet,
                expected,
                actual: tx.nonce,
            });
        }
        let required = tx.cost();
        let available = self.eth_balance(wallet, tx.chain_id);
        if required > available {
            return Err(PolicyError::InsufficientBalance {
                required,
                available,
            });
        }
        Ok(())
    }

    pub fn check_inclusion(
        &self,
        inclusion: &AcceptedInclusion,
        registry: &WalletRegistry,
    ) -> Result<(), PolicyError> {
        let wallet = inclusion.sender;
        registry.get(wallet)?;
        let nonce = inclusion.transaction.nonce;
        if self.accepted.contains_key(&(wallet, nonce)) {
            return Err(PolicyError::InclusionAlreadyProven { wallet, nonce });
        }
        let expected = self.next_nonce(wallet);
        if nonce != expected {
            return Err(PolicyError::NonceMismatch {
                wallet,
                expected,
                actual: nonce,
            });
        }
        Ok(())
    }

    /// Advances the sender's nonce and debits what the transaction could
    /// have cost. Must follow a successful `check_inclusion`.
    pub fn commit_inclusion(&mut self, inclusion: AcceptedInclusion) {
        let tx = &inclusion.transaction;
        let account = self.accounts.entry(inclusion.sender).or_default();
        account.next_nonce = tx.nonce.saturating_add(1);
        let balance = account.eth_balance.entry(tx.chain_id).or_default();
        *balance = balance.saturating_sub(tx.cost());
        self.accepted
            .insert((inclusion.sender, tx.nonce), inclusion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Bytes;

    const WALLET: Address = Address::repeat_byte(0x41);
    const OWNER: Address = Address::repeat_byte(0x42);
    const CHAIN: u64 = 17000;

    fn registry() -> WalletRegistry {
        let mut registry = WalletRegistry::new(3600);
        registry.register_new(WALLET, OWNER, 0).unwrap();
        registry
    }

    fn tx(nonce: u64, destination: Address, amount: u64) -> Type2Transaction {
        Type2Transaction {
            chain_id: CHAIN,
            nonce,
            max_priority_fee_per_gas: 1,
            max_fee_per_gas: 10,
            gas_limit: 21_000,
            destination,
            amount: U256::from(amount),
            payload: Bytes::new(),
        }
    }

    fn inclusion(sender: Address, tx: Type2Transaction, hash: u8) -> AcceptedInclusion {
        AcceptedInclusion {
            block_number: 1,
            block_hash: B256::repeat_byte(0xbb),
            transaction_index: 0,
            transaction_hash: B256::repeat_byte(hash),
            sender,
            transaction: tx,
        }
    }

    #[test]
    fn test_deposit_is_credited_once() {
        let registry = registry();
        let mut policy = TransactionPolicy::new();
        let deposit = inclusion(OWNER, tx(0, WALLET, 1_000_000), 0x01);

        policy.check_deposit(&deposit, &registry).unwrap();
        assert_eq!(policy.commit_deposit(&deposit), U256::from(1_000_000));
        assert_eq!(policy.eth_balance(WALLET, CHAIN), U256::from(1_000_000));
        assert_eq!(
            policy.check_deposit(&deposit, &registry),
            Err(PolicyError::DepositAlreadyCredited(B256::repeat_byte(0x01)))
        );
    }

    #[test]
    fn test_deposit_to_unknown_wallet_is_rejected() {
        let policy = TransactionPolicy::new();
        let deposit = inclusion(OWNER, tx(0, OWNER, 5), 0x02);
        assert_eq!(
            policy.check_deposit(&deposit, &registry()),
            Err(PolicyError::UnknownWallet(OWNER))
        );
    }

    #[test]
    fn test_local_funds_accumulate() {
        let mut policy = TransactionPolicy::new();
        policy.deposit_local_funds(WALLET, CHAIN, U256::from(2));
        assert_eq!(
            policy.deposit_local_funds(WALLET, CHAIN, U256::from(3)),
            U256::from(5)
        );
        assert_eq!(policy.local_balance(WALLET, CHAIN + 1), U256::ZERO);
    }

    #[test]
    fn test_signing_requires_next_nonce_and_balance() {
        let registry = registry();
        let mut policy = TransactionPolicy::new();
        let spend = tx(0, Address::ZERO, 0);
        assert!(matches!(
            policy.check_signable(WALLET, &spend, &registry),
            Err(PolicyError::InsufficientBalance { .. })
        ));

        policy.commit_deposit(&inclusion(OWNER, tx(0, WALLET, 1_000_000), 0x03));
        policy.check_signable(WALLET, &spend, &registry).unwrap();
        assert_eq!(
            policy.check_signable(WALLET, &tx(1, Address::ZERO, 0), &registry),
            Err(PolicyError::NonceMismatch {
                wallet: WALLET,
                expected: 0,
                actual: 1
            })
        );
    }

    #[test]
    fn test_inclusion_advances_nonce_and_debits_cost() {
        let registry = registry();
        let mut policy = TransactionPolicy::new();
        policy.commit_deposit(&inclusion(OWNER, tx(0, WALLET, 1_000_000), 0x04));

        let spend = inclusion(WALLET, tx(0, Address::ZERO, 100), 0x05);
        policy.check_inclusion(&spend, &registry).unwrap();
        policy.commit_inclusion(spend.clone());

        assert_eq!(policy.next_nonce(WALLET), 1);
        assert_eq!(
            policy.eth_balance(WALLET, CHAIN),
            U256::from(1_000_000 - 21_000 * 10 - 100)
        );
        assert_eq!(policy.accepted_inclusion(WALLET, 0), Some(&spend));
        assert_eq!(
            policy.check_inclusion(&spend, &registry),
            Err(PolicyError::InclusionAlreadyProven {
                wallet: WALLET,
                nonce: 0
            })
        );
        assert!(matches!(
            policy.check_inclusion(&inclusion(WALLET, tx(2, Address::ZERO, 0), 0x06), &registry),
            Err(PolicyError::NonceMismatch { expected: 1, .. })
        ));
    }

    #[test]
    fn test_debit_saturates_at_zero() {
        let registry = registry();
        let mut policy = TransactionPolicy::new();
        let spend = inclusion(WALLET, tx(0, Address::ZERO, 5), 0x07);
        policy.check_inclusion(&spend, &registry).unwrap();
        policy.commit_inclusion(spend);
        assert_eq!(policy.eth_balance(WALLET, CHAIN), U256::ZERO);
    }
}
