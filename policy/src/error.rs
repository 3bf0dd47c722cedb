use crate::access_control::Role;
use alloy::primitives::{Address, B256, U256};
use common::error::ProofError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    Unauthorized {
        caller: Address,
        role: Role,
    },
    NotPendingOwner(Address),
    ZeroBlockHash(u64),
    ConflictingBlockHash {
        block_number: u64,
        existing: B256,
        attempted: B256,
    },
    BlockHashNotSet(u64),
    BlockNumberMismatch {
        expected: u64,
        actual: u64,
    },
    Proof(ProofError),
    UnknownWallet(Address),
    WalletAlreadyRegistered(Address),
    UntrustedFactory(Address),
    NotWalletOwner {
        wallet: Address,
        caller: Address,
    },
    WrongChain {
        expected: u64,
        actual: u64,
    },
    NonceMismatch {
        wallet: Address,
        expected: u64,
        actual: u64,
    },
    InclusionAlreadyProven {
        wallet: Address,
        nonce: u64,
    },
    DepositAlreadyCredited(B256),
    UnexpectedSender {
        expected: Address,
        actual: Address,
    },
    UnexpectedTransfer(String),
    RestrictedDestination(Address),
    InsufficientBalance {
        required: U256,
        available: U256,
    },
    NotEnoughEncumbranceTimeLeft {
        time_left: u64,
        required: u64,
    },
    BidBelowBalance {
        bid: U256,
        committed: U256,
    },
    BidExceedsBalance {
        bid: U256,
        balance: U256,
    },
    AuctionNotYetFinalizable {
        now: u64,
        ends_at: u64,
    },
    ZeroBid(Address),
    NotWhitelisted(Address),
    NoPendingTransfer,
    Signer(String),
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::Unauthorized { caller, role } => {
                write!(f, "{caller} does not have the {role} role")
            }
            PolicyError::NotPendingOwner(caller) => write!(f, "{caller} is not the pending owner"),
            PolicyError::ZeroBlockHash(number) => {
                write!(f, "Refusing to store a zero hash for block {number}")
            }
            PolicyError::ConflictingBlockHash {
                block_number,
                existing,
                attempted,
            } => write!(
                f,
                "Block {block_number} already has hash {existing}, refusing {attempted}"
            ),
            PolicyError::BlockHashNotSet(number) => {
                write!(f, "Block hash for block {number} is not yet available")
            }
            PolicyError::BlockNumberMismatch { expected, actual } => {
                write!(f, "Proof is for block {actual}, expected block {expected}")
            }
            PolicyError::Proof(e) => write!(f, "{e}"),
            PolicyError::UnknownWallet(wallet) => write!(f, "{wallet} is not an encumbered wallet"),
            PolicyError::WalletAlreadyRegistered(wallet) => {
                write!(f, "{wallet} is already encumbered")
            }
            PolicyError::UntrustedFactory(caller) => {
                write!(f, "{caller} is not the trusted wallet factory")
            }
            PolicyError::NotWalletOwner { wallet, caller } => {
                write!(f, "{caller} does not own wallet {wallet}")
            }
            PolicyError::WrongChain { expected, actual } => {
                write!(f, "Transaction is for chain {actual}, expected chain {expected}")
            }
            PolicyError::NonceMismatch {
                wallet,
                expected,
                actual,
            } => write!(f, "Nonce {actual} for {wallet} does not match expected nonce {expected}"),
            PolicyError::InclusionAlreadyProven { wallet, nonce } => {
                write!(f, "Inclusion for {wallet} at nonce {nonce} was already proven")
            }
            PolicyError::DepositAlreadyCredited(hash) => {
                write!(f, "Deposit {hash} was already credited")
            }
            PolicyError::UnexpectedSender { expected, actual } => {
                write!(f, "Transaction sent by {actual}, expected {expected}")
            }
            PolicyError::UnexpectedTransfer(msg) => write!(f, "Unexpected transfer: {msg}"),
            PolicyError::RestrictedDestination(destination) => {
                write!(f, "Transactions to {destination} are reserved for the auction")
            }
            PolicyError::InsufficientBalance {
                required,
                available,
            } => write!(f, "Insufficient balance: required {required}, available {available}"),
            PolicyError::NotEnoughEncumbranceTimeLeft {
                time_left,
                required,
            } => write!(
                f,
                "Not enough encumbrance time left: {time_left}s remaining, {required}s required"
            ),
            PolicyError::BidBelowBalance { bid, committed } => {
                write!(f, "Bid {bid} is below the committed bid {committed}")
            }
            PolicyError::BidExceedsBalance { bid, balance } => {
                write!(f, "Bid greater than account's bid balance: bid {bid}, balance {balance}")
            }
            PolicyError::AuctionNotYetFinalizable { now, ends_at } => {
                write!(f, "Auction ends at {ends_at}, current time is {now}")
            }
            PolicyError::ZeroBid(wallet) => write!(f, "Bid of {wallet} must be greater than zero"),
            PolicyError::NotWhitelisted(wallet) => write!(f, "{wallet} is not whitelisted"),
            PolicyError::NoPendingTransfer => {
                write!(f, "Previous proven owner is already the current owner")
            }
            PolicyError::Signer(msg) => write!(f, "Signer error: {msg}"),
        }
    }
}

impl std::error::Error for PolicyError {}

impl From<ProofError> for PolicyError {
    fn from(e: ProofError) -> Self {
        PolicyError::Proof(e)
    }
}
