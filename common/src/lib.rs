// Shared modules for the encumbrance node: codecs, proofs and chain access
pub mod block;
pub mod error;
pub mod execution_layer;
pub mod proof;
pub mod rlp;
pub mod shared;
pub mod signature;
pub mod signer;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transaction;
pub mod trie;
pub mod utils;
