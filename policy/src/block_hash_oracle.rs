use crate::{
    access_control::{AccessControl, Role},
    error::PolicyError,
};
use alloy::primitives::{Address, B256};
use std::collections::BTreeMap;

/// Append-only `block number -> block hash` store written by updaters.
///
/// The first write for a block wins. Re-submitting the stored hash is a
/// no-op, a different hash is rejected.
#[derive(Debug, Clone)]
pub struct BlockHashOracle {
    access: AccessControl,
    hashes: BTreeMap<u64, B256>,
}

impl BlockHashOracle {
    pub fn new(owner: Address) -> Self {
        Self {
            access: AccessControl::new(owner),
            hashes: BTreeMap::new(),
        }
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn access_mut(&mut self) -> &mut AccessControl {
        &mut self.access
    }

    /// Zero while the hash is not yet obtainable.
    pub fn get_block_hash(&self, block_number: u64) -> B256 {
        self.block_hashes(block_number).unwrap_or(B256::ZERO)
    }

    pub fn block_hashes(&self, block_number: u64) -> Option<B256> {
        self.hashes.get(&block_number).copied()
    }

    pub fn trusted_block_hash(&self, block_number: u64) -> Result<B256, PolicyError> {
        self.block_hashes(block_number)
            .ok_or(PolicyError::BlockHashNotSet(block_number))
    }

    pub fn latest_block_number(&self) -> Option<u64> {
        self.hashes.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Returns whether a write happened.
    pub fn set_block_hash(
        &mut self,
        caller: Address,
        block_number: u64,
        block_hash: B256,
    ) -> Result<bool, PolicyError> {
        self.access.require(caller, Role::Updater)?;
        let write = self.check(block_number, block_hash)?;
        if write {
            self.hashes.insert(block_number, block_hash);
        }
        Ok(write)
    }

    /// Stores every entry that is still unset. Either the whole batch is
    /// accepted or nothing is written. Returns the number of new entries.
    pub fn set_multiple_block_hashes(
        &mut self,
        caller: Address,
        entries: &[(u64, B256)],
    ) -> Result<usize, PolicyError> {
        self.access.require(caller, Role::Updater)?;

        let mut staged: BTreeMap<u64, B256> = BTreeMap::new();
        for (block_number, block_hash) in entries {
            if let Some(existing) = staged.get(block_number) {
                if existing != block_hash {
                    return Err(PolicyError::ConflictingBlockHash {
                        block_number: *block_number,
                        existing: *existing,
                        attempted: *block_hash,
                    });
                }
                continue;
            }
            if self.check(*block_number, *block_hash)? {
                staged.insert(*block_number, *block_hash);
            }
        }

        let written = staged.len();
        self.hashes.extend(staged);
        Ok(written)
    }

    fn check(&self, block_number: u64, block_hash: B256) -> Result<bool, PolicyError> {
        if block_hash.is_zero() {
            return Err(PolicyError::ZeroBlockHash(block_number));
        }
        match self.hashes.get(&block_number) {
            None => Ok(true),
            Some(existing) if *existing == block_hash => Ok(false),
            Some(existing) => Err(PolicyError::ConflictingBlockHash {
                block_number,
                existing: *existing,
                attempted: block_hash,
            }),
        }
    }
}
