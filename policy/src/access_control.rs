use crate::error::PolicyError;
use alloy::primitives::Address;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Role {
    Owner,
    Updater,
}

/// Single owner with two-step handover, plus a set of updaters managed by
/// the owner.
#[derive(Debug, Clone)]
pub struct AccessControl {
    owner: Address,
    pending_owner: Option<Address>,
    updaters: HashSet<Address>,
}

impl AccessControl {
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            pending_owner: None,
            updaters: HashSet::new(),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn pending_owner(&self) -> Option<Address> {
        self.pending_owner
    }

    pub fn has_role(&self, account: Address, role: Role) -> bool {
        match role {
            Role::Owner => account == self.owner,
            Role::Updater => self.updaters.contains(&account),
        }
    }

    pub fn require(&self, caller: Address, role: Role) -> Result<(), PolicyError> {
        if self.has_role(caller, role) {
            Ok(())
        } else {
            Err(PolicyError::Unauthorized { caller, role })
        }
    }

    pub fn transfer_ownership(
        &mut self,
        caller: Address,
        new_owner: Address,
    ) -> Result<(), PolicyError> {
        self.require(caller, Role::Owner)?;
        self.pending_owner = Some(new_owner);
        Ok(())
    }

    /// Completes the handover; returns the previous owner.
    pub fn accept_ownership(&mut self, caller: Address) -> Result<Address, PolicyError> {
        if self.pending_owner != Some(caller) {
            return Err(PolicyError::NotPendingOwner(caller));
        }
        self.pending_owner = None;
        Ok(std::mem::replace(&mut self.owner, caller))
    }

    pub fn grant_updater(&mut self, caller: Address, account: Address) -> Result<bool, PolicyError> {
        self.require(caller, Role::Owner)?;
        Ok(self.updaters.insert(account))
    }

    pub fn revoke_updater(&mut self, caller: Address, account: Address) -> Result<bool, PolicyError> {
        self.require(caller, Role::Owner)?;
        Ok(self.updaters.remove(&account))
    }
}
