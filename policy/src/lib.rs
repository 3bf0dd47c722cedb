// Encumbrance policy: block hash oracle, wallet registry, transaction policy and NFT auction
pub mod access_control;
pub mod auction;
pub mod block_hash_oracle;
pub mod clock;
pub mod engine;
pub mod error;
pub mod events;
pub mod inclusion;
pub mod transaction_policy;
pub mod wallet_registry;

pub use engine::{EngineConfig, PolicyEngine, SignedTransaction};
pub use error::PolicyError;
