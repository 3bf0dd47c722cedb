//! The policy as one state machine. Every mutating call checks everything
//! first and only then writes, so a failed call leaves no trace.

mod tests;

use crate::{
    access_control::{AccessControl, Role},
    auction::{AuctionConfig, AuctionOutcome, AuctionPolicy, TransferClaim},
    block_hash_oracle::BlockHashOracle,
    clock::Clock,
    error::PolicyError,
    events::PolicyEvent,
    inclusion::{AcceptedInclusion, verify_inclusion},
    transaction_policy::TransactionPolicy,
    wallet_registry::{EncumberedWallet, WalletRegistry},
};
use alloy::primitives::{Address, B256, Bytes, U256};
use common::{
    error::ProofError,
    proof::InclusionProof,
    signature::{SignaturePayload, der_to_eth_signature},
    signer::DerSigner,
    transaction::{SignedType2Transaction, Type2Transaction},
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Admin of the policy and owner of the oracle.
    pub owner: Address,
    pub updater: Option<Address>,
    pub auction: AuctionConfig,
    /// Wallet holding the NFT when the policy starts.
    pub initial_owner: Address,
    pub initial_encumbrance_time: u64,
}

/// A transaction signed by an encumbered wallet, ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    /// What the signer returned, without a recovery id.
    pub der_signature: Bytes,
    pub transaction: SignedType2Transaction,
    pub encoded: Bytes,
    pub transaction_hash: B256,
}

pub struct PolicyEngine<C: Clock, S: DerSigner> {
    clock: C,
    signer: S,
    admin: AccessControl,
    oracle: BlockHashOracle,
    wallets: WalletRegistry,
    transactions: TransactionPolicy,
    auction: AuctionPolicy,
    events: Vec<PolicyEvent>,
}

impl<C: Clock, S: DerSigner> PolicyEngine<C, S> {
    pub fn new(config: EngineConfig, clock: C, signer: S) -> Result<Self, PolicyError> {
        let mut oracle = BlockHashOracle::new(config.owner);
        if let Some(updater) = config.updater {
            oracle.access_mut().grant_updater(config.owner, updater)?;
        }
        let auction = AuctionPolicy::new(config.auction, config.initial_owner, clock.unix_now());
        Ok(Self {
            clock,
            signer,
            admin: AccessControl::new(config.owner),
            oracle,
            wallets: WalletRegistry::new(config.initial_encumbrance_time),
            transactions: TransactionPolicy::new(),
            auction,
            events: Vec::new(),
        })
    }

    pub fn now(&self) -> u64 {
        self.clock.unix_now()
    }

    pub fn admin(&self) -> &AccessControl {
        &self.admin
    }

    pub fn oracle(&self) -> &BlockHashOracle {
        &self.oracle
    }

    pub fn wallets(&self) -> &WalletRegistry {
        &self.wallets
    }

    pub fn transactions(&self) -> &TransactionPolicy {
        &self.transactions
    }

    pub fn auction(&self) -> &AuctionPolicy {
        &self.auction
    }

    pub fn events(&self) -> &[PolicyEvent] {
        &self.events
    }

    /// Events appended after the first `from`.
    pub fn events_since(&self, from: usize) -> &[PolicyEvent] {
        self.events.get(from..).unwrap_or_default()
    }

    fn emit(&mut self, event: PolicyEvent) {
        debug!("Policy event: {:?}", event);
        self.events.push(event);
    }

    // Block hash oracle

    pub fn get_block_hash(&self, block_number: u64) -> B256 {
        self.oracle.get_block_hash(block_number)
    }

    pub fn set_block_hash(
        &mut self,
        caller: Address,
        block_number: u64,
        block_hash: B256,
    ) -> Result<bool, PolicyError> {
        let written = self.oracle.set_block_hash(caller, block_number, block_hash)?;
        if written {
            info!("Block hash set: {} -> {}", block_number, block_hash);
            self.emit(PolicyEvent::BlockHashSet {
                block_number,
                block_hash,
            });
        }
        Ok(written)
    }

    pub fn set_multiple_block_hashes(
        &mut self,
        caller: Address,
        entries: &[(u64, B256)],
    ) -> Result<usize, PolicyError> {
        let fresh: BTreeMap<u64, B256> = entries
            .iter()
            .filter(|(block_number, _)| self.oracle.block_hashes(*block_number).is_none())
            .copied()
            .collect();
        let written = self.oracle.set_multiple_block_hashes(caller, entries)?;
        if written > 0 {
            info!("Block hashes set: {} new of {} submitted", written, entries.len());
        }
        for (block_number, block_hash) in fresh {
            self.emit(PolicyEvent::BlockHashSet {
                block_number,
                block_hash,
            });
        }
        Ok(written)
    }

    pub fn grant_updater(&mut self, caller: Address, account: Address) -> Result<bool, PolicyError> {
        self.oracle.access_mut().grant_updater(caller, account)
    }

    pub fn revoke_updater(
        &mut self,
        caller: Address,
        account: Address,
    ) -> Result<bool, PolicyError> {
        self.oracle.access_mut().revoke_updater(caller, account)
    }

    pub fn transfer_oracle_ownership(
        &mut self,
        caller: Address,
        new_owner: Address,
    ) -> Result<(), PolicyError> {
        self.oracle.access_mut().transfer_ownership(caller, new_owner)
    }

    pub fn accept_oracle_ownership(&mut self, caller: Address) -> Result<(), PolicyError> {
        let previous_owner = self.oracle.access_mut().accept_ownership(caller)?;
        self.emit(PolicyEvent::OwnershipTransferred {
            previous_owner,
            new_owner: caller,
        });
        Ok(())
    }

    // Administration

    pub fn transfer_ownership(
        &mut self,
        caller: Address,
        new_owner: Address,
    ) -> Result<(), PolicyError> {
        self.admin.transfer_ownership(caller, new_owner)
    }

    pub fn accept_ownership(&mut self, caller: Address) -> Result<(), PolicyError> {
        let previous_owner = self.admin.accept_ownership(caller)?;
        self.emit(PolicyEvent::OwnershipTransferred {
            previous_owner,
            new_owner: caller,
        });
        Ok(())
    }

    pub fn set_trusted_factory(
        &mut self,
        caller: Address,
        factory: Address,
    ) -> Result<(), PolicyError> {
        self.admin.require(caller, Role::Owner)?;
        self.wallets.set_trusted_factory(factory);
        Ok(())
    }

    pub fn set_previous_proven_owner(
        &mut self,
        caller: Address,
        owner: Address,
    ) -> Result<(), PolicyError> {
        self.admin.require(caller, Role::Owner)?;
        info!("Previous proven owner overridden to {}", owner);
        self.auction.set_previous_proven_owner(owner);
        Ok(())
    }

    pub fn update_whitelist(
        &mut self,
        caller: Address,
        wallets: &[Address],
        allowed: bool,
    ) -> Result<(), PolicyError> {
        self.admin.require(caller, Role::Owner)?;
        self.auction.update_whitelist(wallets, allowed);
        Ok(())
    }

    pub fn set_whitelist_enabled(&mut self, caller: Address, enabled: bool) -> Result<(), PolicyError> {
        self.admin.require(caller, Role::Owner)?;
        self.auction.set_whitelist_enabled(enabled);
        Ok(())
    }

    // Wallets

    /// Creates a signer-held wallet owned by `caller`, encumbered for the
    /// initial period.
    pub fn create_wallet(&mut self, caller: Address) -> Result<EncumberedWallet, PolicyError> {
        let wallet = self
            .signer
            .create_account()
            .map_err(|e| PolicyError::Signer(e.to_string()))?;
        let now = self.now();
        let entry = self.wallets.register_new(wallet, caller, now)?.clone();
        info!(
            "Wallet {} created for {}, encumbered until {}",
            wallet, caller, entry.encumbrance_expiration
        );
        self.emit(PolicyEvent::WalletEncumbered {
            wallet,
            owner: caller,
            encumbrance_expiration: entry.encumbrance_expiration,
        });
        Ok(entry)
    }

    /// Registers a wallet created by the trusted factory.
    pub fn enter_encumbrance(
        &mut self,
        caller: Address,
        wallet: Address,
        owner: Address,
        encumbrance_expiration: u64,
    ) -> Result<(), PolicyError> {
        if !self.wallets.is_trusted_factory(caller) {
            return Err(PolicyError::UntrustedFactory(caller));
        }
        if !self.signer.has_account(wallet) {
            return Err(PolicyError::Signer(format!("no key held for wallet {wallet}")));
        }
        self.wallets
            .enter_encumbrance(wallet, owner, encumbrance_expiration)?;
        self.emit(PolicyEvent::WalletEncumbered {
            wallet,
            owner,
            encumbrance_expiration,
        });
        Ok(())
    }

    pub fn encumbrance_time_left(&self, wallet: Address) -> Result<u64, PolicyError> {
        self.wallets.encumbrance_time_left(wallet, self.now())
    }

    // Transaction policy

    fn verify(
        &self,
        signed: &SignedType2Transaction,
        proof: &InclusionProof,
        block_number: u64,
    ) -> Result<AcceptedInclusion, PolicyError> {
        let accepted = verify_inclusion(&self.oracle, signed, proof, block_number)?;
        let expected = self.auction.config().target_chain_id;
        if accepted.transaction.chain_id != expected {
            return Err(PolicyError::WrongChain {
                expected,
                actual: accepted.transaction.chain_id,
            });
        }
        Ok(accepted)
    }

    /// Credits a proven transfer into an encumbered wallet.
    pub fn deposit_funds(
        &mut self,
        signed: &SignedType2Transaction,
        proof: &InclusionProof,
        block_number: u64,
    ) -> Result<U256, PolicyError> {
        let accepted = self.verify(signed, proof, block_number)?;
        self.transactions.check_deposit(&accepted, &self.wallets)?;

        let balance = self.transactions.commit_deposit(&accepted);
        let tx = &accepted.transaction;
        info!(
            "Deposit of {} credited to {} on chain {}",
            tx.amount, tx.destination, tx.chain_id
        );
        self.emit(PolicyEvent::DepositCredited {
            wallet: tx.destination,
            chain_id: tx.chain_id,
            amount: tx.amount,
            transaction_hash: accepted.transaction_hash,
        });
        Ok(balance)
    }

    /// Credits funds received on the policy chain itself. Only the policy
    /// owner can attest to those.
    pub fn deposit_local_funds(
        &mut self,
        caller: Address,
        wallet: Address,
        chain_id: u64,
        value: U256,
    ) -> Result<U256, PolicyError> {
        self.admin.require(caller, Role::Owner)?;
        self.wallets.get(wallet)?;
        let balance = self.transactions.deposit_local_funds(wallet, chain_id, value);
        self.emit(PolicyEvent::LocalDeposit {
            wallet,
            chain_id,
            amount: value,
        });
        Ok(balance)
    }

    pub fn eth_balance(&self, wallet: Address, chain_id: u64) -> U256 {
        self.transactions.eth_balance(wallet, chain_id)
    }

    pub fn local_balance(&self, wallet: Address, chain_id: u64) -> U256 {
        self.transactions.local_balance(wallet, chain_id)
    }

    pub fn next_nonce(&self, wallet: Address) -> u64 {
        self.transactions.next_nonce(wallet)
    }

    pub fn prove_transaction_inclusion(
        &mut self,
        signed: &SignedType2Transaction,
        proof: &InclusionProof,
        block_number: u64,
    ) -> Result<AcceptedInclusion, PolicyError> {
        let accepted = self.verify(signed, proof, block_number)?;
        self.transactions.check_inclusion(&accepted, &self.wallets)?;
        self.accept_inclusion(accepted.clone());
        Ok(accepted)
    }

    fn accept_inclusion(&mut self, accepted: AcceptedInclusion) {
        info!(
            "Inclusion accepted: {} nonce {} in block {} at index {}",
            accepted.sender,
            accepted.transaction.nonce,
            accepted.block_number,
            accepted.transaction_index
        );
        self.transactions.commit_inclusion(accepted.clone());
        self.emit(PolicyEvent::InclusionAccepted(accepted));
    }

    /// Signs `tx` for `wallet` on behalf of the wallet's owner.
    pub fn sign_transaction(
        &mut self,
        caller: Address,
        wallet: Address,
        tx: Type2Transaction,
    ) -> Result<SignedTransaction, PolicyError> {
        self.wallets.require_owner(wallet, caller)?;
        if tx.destination == self.auction.config().nft_contract {
            return Err(PolicyError::RestrictedDestination(tx.destination));
        }
        self.sign_checked(wallet, tx)
    }

    fn sign_checked(
        &mut self,
        wallet: Address,
        tx: Type2Transaction,
    ) -> Result<SignedTransaction, PolicyError> {
        let expected = self.auction.config().target_chain_id;
        if tx.chain_id != expected {
            return Err(PolicyError::WrongChain {
                expected,
                actual: tx.chain_id,
            });
        }
        self.transactions
            .check_signable(wallet, &tx, &self.wallets)?;

        let digest = tx.signing_hash();
        let der_signature = self
            .signer
            .sign_digest(wallet, digest)
            .map_err(|e| PolicyError::Signer(e.to_string()))?;
        let signature =
            der_to_eth_signature(&der_signature, &SignaturePayload::Digest(digest), wallet)?;
        let nonce = tx.nonce;
        let transaction = tx.with_signature(signature);
        let encoded = Bytes::from(transaction.encoded()?);
        let transaction_hash = transaction.hash()?;

        self.emit(PolicyEvent::TransactionSigned {
            wallet,
            nonce,
            transaction_hash,
        });
        Ok(SignedTransaction {
            der_signature,
            transaction,
            encoded,
            transaction_hash,
        })
    }

    // Auction

    pub fn place_bid(
        &mut self,
        caller: Address,
        wallet: Address,
        amount: U256,
        value: U256,
    ) -> Result<U256, PolicyError> {
        self.wallets.require_owner(wallet, caller)?;
        let time_left = self.wallets.encumbrance_time_left(wallet, self.now())?;
        let bid_balance = self.auction.place_bid(wallet, amount, value, time_left)?;
        self.emit(PolicyEvent::BidPlaced {
            wallet,
            amount,
            bid_balance,
        });
        Ok(bid_balance)
    }

    /// Tops the bid balance up to `amount` from the wallet's local balance
    /// on the target chain.
    pub fn place_bid_from_local_balance(
        &mut self,
        caller: Address,
        wallet: Address,
        amount: U256,
    ) -> Result<U256, PolicyError> {
        self.wallets.require_owner(wallet, caller)?;
        let chain_id = self.auction.config().target_chain_id;
        let value = amount.saturating_sub(self.auction.bid_balance(wallet));
        let available = self.transactions.local_balance(wallet, chain_id);
        if value > available {
            return Err(PolicyError::InsufficientBalance {
                required: value,
                available,
            });
        }
        let bid_balance = self.place_bid(caller, wallet, amount, value)?;
        self.transactions
            .withdraw_local_funds(wallet, chain_id, value)?;
        Ok(bid_balance)
    }

    pub fn finalize_auction(&mut self) -> Result<AuctionOutcome, PolicyError> {
        let outcome = self.auction.finalize(self.now())?;
        match outcome.winner {
            Some(winner) => info!("Auction finalized: {} wins at {}", winner, outcome.price),
            None => info!("Auction finalized without bids"),
        }
        self.emit(PolicyEvent::AuctionFinalized {
            winner: outcome.winner,
            price: outcome.price,
            next_auction_start: outcome.next_auction_start,
        });
        Ok(outcome)
    }

    pub fn withdraw_bid_balance(
        &mut self,
        caller: Address,
        wallet: Address,
    ) -> Result<U256, PolicyError> {
        self.wallets.require_owner(wallet, caller)?;
        let amount = self.auction.withdraw_bid_balance(wallet);
        if !amount.is_zero() {
            self.emit(PolicyEvent::BidBalanceWithdrawn { wallet, amount });
        }
        Ok(amount)
    }

    /// Moves the uncommitted bid balance back to the local balance it was
    /// funded from.
    pub fn withdraw_bid_balance_to_local(
        &mut self,
        caller: Address,
        wallet: Address,
    ) -> Result<U256, PolicyError> {
        let amount = self.withdraw_bid_balance(caller, wallet)?;
        if !amount.is_zero() {
            let chain_id = self.auction.config().target_chain_id;
            self.transactions
                .deposit_local_funds(wallet, chain_id, amount);
        }
        Ok(amount)
    }

    pub fn bid_balance(&self, wallet: Address) -> U256 {
        self.auction.bid_balance(wallet)
    }

    pub fn current_owner(&self) -> Address {
        self.auction.current_owner()
    }

    pub fn previous_owner(&self) -> Address {
        self.auction.previous_proven_owner()
    }

    pub fn next_auction_end(&self) -> u64 {
        self.auction.next_auction_end()
    }

    pub fn nft_transfer_transaction(
        &self,
        max_fee_per_gas: u128,
        new_owner: Address,
        nonce: u64,
    ) -> Type2Transaction {
        self.auction
            .nft_transfer_transaction(max_fee_per_gas, new_owner, nonce)
    }

    /// Signs the NFT transfer from the previous proven owner to the current
    /// owner, at the previous owner's next nonce.
    pub fn sign_nft_transfer_transaction(
        &mut self,
        max_fee_per_gas: u128,
    ) -> Result<SignedTransaction, PolicyError> {
        if !self.auction.transfer_pending() {
            return Err(PolicyError::NoPendingTransfer);
        }
        let from = self.auction.previous_proven_owner();
        let to = self.auction.current_owner();
        let nonce = self.transactions.next_nonce(from);
        let tx = self
            .auction
            .nft_transfer_transaction(max_fee_per_gas, to, nonce);
        let signed = self.sign_checked(from, tx)?;
        info!("NFT transfer signed: {} -> {} at nonce {}", from, to, nonce);
        self.auction.escrow_transfer(signed.transaction.clone());
        Ok(signed)
    }

    /// Moves the previous proven owner forward once the NFT transfer is
    /// proven. A transfer already accepted through
    /// `prove_transaction_inclusion` is reused, otherwise `proof` must be
    /// given and the inclusion is accepted here.
    pub fn prove_previous_transfer(
        &mut self,
        signed: &SignedType2Transaction,
        proof: Option<(&InclusionProof, u64)>,
        claim: TransferClaim,
    ) -> Result<(), PolicyError> {
        let previous_owner = self.auction.previous_proven_owner();
        let (sender, fresh) = match self
            .transactions
            .accepted_inclusion(previous_owner, claim.claimed_nonce)
        {
            Some(accepted) => {
                if accepted.transaction_hash != signed.hash()? {
                    return Err(PolicyError::UnexpectedTransfer(format!(
                        "nonce {} was accepted for transaction {}",
                        claim.claimed_nonce, accepted.transaction_hash
                    )));
                }
                (accepted.sender, None)
            }
            None => {
                let (proof, block_number) = proof.ok_or_else(|| {
                    PolicyError::Proof(ProofError::InvalidProof(format!(
                        "no inclusion proven for nonce {}",
                        claim.claimed_nonce
                    )))
                })?;
                let accepted = self.verify(signed, proof, block_number)?;
                self.transactions.check_inclusion(&accepted, &self.wallets)?;
                (accepted.sender, Some(accepted))
            }
        };
        self.auction.check_previous_transfer(signed, sender, &claim)?;

        if let Some(accepted) = fresh {
            self.accept_inclusion(accepted);
        }
        self.auction.commit_previous_transfer(claim.new_owner);
        info!(
            "NFT transfer proven: {} -> {}",
            previous_owner, claim.new_owner
        );
        self.emit(PolicyEvent::PreviousOwnerProven {
            previous_owner,
            new_owner: claim.new_owner,
            nonce: signed.transaction.nonce,
        });
        Ok(())
    }

    /// Authorizes a message from the wallet currently holding the NFT.
    pub fn send_current_owner_message(
        &mut self,
        caller: Address,
        target: Address,
        data: Bytes,
    ) -> Result<(), PolicyError> {
        let owner = self.auction.current_owner();
        self.wallets.require_owner(owner, caller)?;
        self.emit(PolicyEvent::CurrentOwnerMessage {
            owner,
            target,
            data,
        });
        Ok(())
    }
}
