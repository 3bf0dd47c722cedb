use crate::error::PolicyError;
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncumberedWallet {
    pub address: Address,
    /// Account allowed to act for the wallet on the policy chain.
    pub owner: Address,
    /// Unix time after which the policy no longer controls the wallet.
    pub encumbrance_expiration: u64,
}

/// Wallets placed under the policy, either by the built-in factory or by an
/// external trusted factory.
#[derive(Debug, Clone)]
pub struct WalletRegistry {
    trusted_factory: Option<Address>,
    initial_encumbrance_time: u64,
    wallets: HashMap<Address, EncumberedWallet>,
}

impl WalletRegistry {
    pub fn new(initial_encumbrance_time: u64) -> Self {
        Self {
            trusted_factory: None,
            initial_encumbrance_time,
            wallets: HashMap::new(),
        }
    }

    pub fn trusted_factory(&self) -> Option<Address> {
        self.trusted_factory
    }

    pub fn set_trusted_factory(&mut self, factory: Address) {
        self.trusted_factory = Some(factory);
    }

    pub fn initial_encumbrance_time(&self) -> u64 {
        self.initial_encumbrance_time
    }

    pub fn is_trusted_factory(&self, caller: Address) -> bool {
        self.trusted_factory == Some(caller)
    }

    pub fn get(&self, wallet: Address) -> Result<&EncumberedWallet, PolicyError> {
        self.wallets
            .get(&wallet)
            .ok_or(PolicyError::UnknownWallet(wallet))
    }

    pub fn contains(&self, wallet: Address) -> bool {
        self.wallets.contains_key(&wallet)
    }

    pub fn require_owner(
        &self,
        wallet: Address,
        caller: Address,
    ) -> Result<&EncumberedWallet, PolicyError> {
        let entry = self.get(wallet)?;
        if entry.owner != caller {
            return Err(PolicyError::NotWalletOwner { wallet, caller });
        }
        Ok(entry)
    }

    pub fn encumbrance_time_left(&self, wallet: Address, now: u64) -> Result<u64, PolicyError> {
        Ok(self.get(wallet)?.encumbrance_expiration.saturating_sub(now))
    }

    pub fn wallets_of(&self, owner: Address) -> Vec<&EncumberedWallet> {
        let mut wallets: Vec<_> = self
            .wallets
            .values()
            .filter(|wallet| wallet.owner == owner)
            .collect();
        wallets.sort_by_key(|wallet| wallet.address);
        wallets
    }

    /// Registers a freshly created wallet for the full encumbrance period.
    pub fn register_new(
        &mut self,
        wallet: Address,
        owner: Address,
        now: u64,
    ) -> Result<&EncumberedWallet, PolicyError> {
        let expiration = now.saturating_add(self.initial_encumbrance_time);
        self.enter_encumbrance(wallet, owner, expiration)
    }

    pub fn enter_encumbrance(
        &mut self,
        wallet: Address,
        owner: Address,
        encumbrance_expiration: u64,
    ) -> Result<&EncumberedWallet, PolicyError> {
        if self.wallets.contains_key(&wallet) {
            return Err(PolicyError::WalletAlreadyRegistered(wallet));
        }
        Ok(self.wallets.entry(wallet).or_insert(EncumberedWallet {
            address: wallet,
            owner,
            encumbrance_expiration,
        }))
    }
}
