use alloy::primitives::{Address, B256, Bytes, keccak256};
use anyhow::Error;
use k256::ecdsa::{Signature, SigningKey, signature::hazmat::PrehashSigner};
use std::collections::HashMap;
use std::str::FromStr;

use crate::signature::address_of;

/// Signing capability of the enclave. Signatures come back DER encoded,
/// without a recovery id.
pub trait DerSigner: Send + Sync {
    /// Creates a new encumbered account and returns its address.
    fn create_account(&mut self) -> Result<Address, Error>;

    fn has_account(&self, account: Address) -> bool;

    fn sign_digest(&self, account: Address, digest: B256) -> Result<Bytes, Error>;
}

/// Keys derived from a master secret: account `i` uses
/// `keccak256(master_secret || i)` as its private key.
pub struct LocalDerSigner {
    master_secret: B256,
    keys: HashMap<Address, SigningKey>,
    next_index: u64,
}

impl LocalDerSigner {
    pub fn new(master_secret: B256) -> Self {
        Self {
            master_secret,
            keys: HashMap::new(),
            next_index: 0,
        }
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Address> {
        self.keys.keys()
    }

    fn derive_key(&self, index: u64) -> Result<SigningKey, Error> {
        let mut seed = [0u8; 40];
        seed[..32].copy_from_slice(self.master_secret.as_slice());
        seed[32..].copy_from_slice(&index.to_be_bytes());
        SigningKey::from_slice(keccak256(seed).as_slice())
            .map_err(|e| anyhow::anyhow!("Failed to derive key for account {}: {}", index, e))
    }
}

impl DerSigner for LocalDerSigner {
    fn create_account(&mut self) -> Result<Address, Error> {
        let key = self.derive_key(self.next_index)?;
        self.next_index += 1;
        let address = address_of(key.verifying_key());
        self.keys.insert(address, key);
        Ok(address)
    }

    fn has_account(&self, account: Address) -> bool {
        self.keys.contains_key(&account)
    }

    fn sign_digest(&self, account: Address, digest: B256) -> Result<Bytes, Error> {
        let key = self
            .keys
            .get(&account)
            .ok_or_else(|| anyhow::anyhow!("No key for account {}", account))?;
        let signature: Signature = key
            .sign_prehash(digest.as_slice())
            .map_err(|e| anyhow::anyhow!("Failed to sign for {}: {}", account, e))?;
        Ok(Bytes::copy_from_slice(signature.to_der().as_bytes()))
    }
}

/// Builds the local signer from a hex encoded master secret.
pub fn create_signer(master_secret: &str) -> Result<LocalDerSigner, Error> {
    let secret = B256::from_str(master_secret)
        .map_err(|e| anyhow::anyhow!("Invalid signer master secret: {}", e))?;
    Ok(LocalDerSigner::new(secret))
}
