use super::nibbles::{hp_decode, to_nibbles};
use crate::{
    error::ProofError,
    rlp::{self, RlpItem},
};
use alloy::primitives::{B256, Bytes, keccak256};
use std::collections::{HashMap, HashSet};

/// Replays `proof` as a sparse trie rooted at `root` and returns the value
/// stored under `key`.
///
/// Every proof node must be reached by the lookup; surplus or duplicated
/// nodes make the proof invalid.
pub fn verify_proof(root: B256, key: &[u8], proof: &[Bytes]) -> Result<Vec<u8>, ProofError> {
    let nodes: HashMap<B256, &Bytes> = proof.iter().map(|node| (keccak256(node), node)).collect();
    if nodes.len() != proof.len() {
        return Err(ProofError::InvalidProof(
            "proof contains duplicate nodes".to_string(),
        ));
    }

    let mut sparse = SparseTrie {
        nodes,
        visited: HashSet::new(),
    };
    let mut node = sparse.load(root)?;
    let path = to_nibbles(key);
    let mut remaining = path.as_slice();

    let value = loop {
        let items = node.as_list().map_err(|_| {
            ProofError::InvalidProof("trie node is not a list".to_string())
        })?;
        match items {
            [children @ .., value] if children.len() == 16 => match remaining.split_first() {
                None => break value.as_bytes()?.to_vec(),
                Some((first, rest)) => {
                    remaining = rest;
                    node = sparse.resolve(&children[usize::from(*first)])?;
                }
            },
            [encoded_path, next] => {
                let (node_path, leaf) = hp_decode(encoded_path.as_bytes()?)?;
                remaining = remaining.strip_prefix(node_path.as_slice()).ok_or_else(|| {
                    ProofError::InvalidProof("key diverges from proof path".to_string())
                })?;
                if leaf {
                    if !remaining.is_empty() {
                        return Err(ProofError::InvalidProof(
                            "leaf reached before the end of the key".to_string(),
                        ));
                    }
                    break next.as_bytes()?.to_vec();
                }
                node = sparse.resolve(next)?;
            }
            other => {
                return Err(ProofError::InvalidProof(format!(
                    "trie node has {} items",
                    other.len()
                )));
            }
        }
    };

    if value.is_empty() {
        return Err(ProofError::InvalidProof(format!(
            "no value stored under key 0x{}",
            hex::encode(key)
        )));
    }
    if sparse.visited.len() != sparse.nodes.len() {
        return Err(ProofError::InvalidProof(format!(
            "{} proof nodes are unreachable from the root",
            sparse.nodes.len() - sparse.visited.len()
        )));
    }
    Ok(value)
}

struct SparseTrie<'a> {
    nodes: HashMap<B256, &'a Bytes>,
    visited: HashSet<B256>,
}

impl SparseTrie<'_> {
    fn load(&mut self, hash: B256) -> Result<RlpItem, ProofError> {
        let encoded = self
            .nodes
            .get(&hash)
            .ok_or_else(|| ProofError::InvalidProof(format!("missing trie node {hash}")))?;
        self.visited.insert(hash);
        rlp::decode(encoded)
    }

    /// Follows a child reference: a 32 byte hash into the proof, or an
    /// inline node embedded in its parent.
    fn resolve(&mut self, reference: &RlpItem) -> Result<RlpItem, ProofError> {
        match reference {
            RlpItem::List(_) => {
                if rlp::encode(reference).len() >= 32 {
                    return Err(ProofError::InvalidProof(
                        "inline trie node is not shorter than a hash".to_string(),
                    ));
                }
                Ok(reference.clone())
            }
            RlpItem::Bytes(bytes) if bytes.is_empty() => Err(ProofError::InvalidProof(
                "key is absent from the trie".to_string(),
            )),
            RlpItem::Bytes(bytes) if bytes.len() == 32 => self.load(B256::from_slice(bytes)),
            RlpItem::Bytes(bytes) => Err(ProofError::InvalidProof(format!(
                "child reference of {} bytes",
                bytes.len()
            ))),
        }
    }
}
