//! Merkle-Patricia trie over RLP-encoded transaction indices.

mod nibbles;
mod proof;

use crate::{
    error::ProofError,
    rlp::{self, RlpItem},
};
use alloy::primitives::{B256, Bytes, b256, keccak256};
use nibbles::{common_prefix_len, hp_encode, to_nibbles};
pub use proof::verify_proof;

/// Root of a trie with no entries, `keccak256(0x80)`.
pub const EMPTY_ROOT: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

#[derive(Debug, Clone, Default)]
enum Node {
    #[default]
    Empty,
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
    Extension {
        path: Vec<u8>,
        child: Box<Node>,
    },
    Branch {
        children: Box<[Node; 16]>,
        value: Option<Vec<u8>>,
    },
}

impl Node {
    fn empty_branch() -> Node {
        Node::Branch {
            children: Box::new(std::array::from_fn(|_| Node::Empty)),
            value: None,
        }
    }

    fn with_prefix(prefix: &[u8], node: Node) -> Node {
        if prefix.is_empty() {
            node
        } else {
            Node::Extension {
                path: prefix.to_vec(),
                child: Box::new(node),
            }
        }
    }

    fn insert(self, path: &[u8], value: Vec<u8>) -> Node {
        match self {
            Node::Empty => Node::Leaf {
                path: path.to_vec(),
                value,
            },
            Node::Leaf {
                path: leaf_path,
                value: leaf_value,
            } => {
                let common = common_prefix_len(&leaf_path, path);
                if common == leaf_path.len() && common == path.len() {
                    return Node::Leaf {
                        path: leaf_path,
                        value,
                    };
                }
                let branch = Node::empty_branch()
                    .insert(&leaf_path[common..], leaf_value)
                    .insert(&path[common..], value);
                Node::with_prefix(&path[..common], branch)
            }
            Node::Extension {
                path: ext_path,
                child,
            } => {
                let common = common_prefix_len(&ext_path, path);
                if common == ext_path.len() {
                    return Node::Extension {
                        path: ext_path,
                        child: Box::new(child.insert(&path[common..], value)),
                    };
                }
                // The extension diverges at `common`: hang its remainder off a new branch.
                let mut branch = Node::empty_branch();
                if let Node::Branch { children, .. } = &mut branch {
                    let slot = usize::from(ext_path[common]);
                    children[slot] = Node::with_prefix(&ext_path[common + 1..], *child);
                }
                let branch = branch.insert(&path[common..], value);
                Node::with_prefix(&path[..common], branch)
            }
            Node::Branch {
                mut children,
                value: branch_value,
            } => match path.split_first() {
                None => Node::Branch {
                    children,
                    value: Some(value),
                },
                Some((first, rest)) => {
                    let slot = usize::from(*first);
                    let child = std::mem::take(&mut children[slot]);
                    children[slot] = child.insert(rest, value);
                    Node::Branch {
                        children,
                        value: branch_value,
                    }
                }
            },
        }
    }

    fn get(&self, path: &[u8]) -> Option<&[u8]> {
        match self {
            Node::Empty => None,
            Node::Leaf {
                path: leaf_path,
                value,
            } => (leaf_path.as_slice() == path).then_some(value.as_slice()),
            Node::Extension {
                path: ext_path,
                child,
            } => path
                .strip_prefix(ext_path.as_slice())
                .and_then(|rest| child.get(rest)),
            Node::Branch { children, value } => match path.split_first() {
                None => value.as_deref(),
                Some((first, rest)) => children[usize::from(*first)].get(rest),
            },
        }
    }

    fn to_item(&self) -> RlpItem {
        match self {
            Node::Empty => RlpItem::bytes(Bytes::new()),
            Node::Leaf { path, value } => RlpItem::List(vec![
                RlpItem::bytes(hp_encode(path, true)),
                RlpItem::bytes(value.clone()),
            ]),
            Node::Extension { path, child } => RlpItem::List(vec![
                RlpItem::bytes(hp_encode(path, false)),
                child.reference(),
            ]),
            Node::Branch { children, value } => {
                let mut items: Vec<RlpItem> = children.iter().map(Node::reference).collect();
                items.push(RlpItem::bytes(value.clone().unwrap_or_default()));
                RlpItem::List(items)
            }
        }
    }

    fn encode(&self) -> Vec<u8> {
        rlp::encode(&self.to_item())
    }

    /// How a parent refers to this node: inline when the encoding is shorter
    /// than a hash, by keccak otherwise.
    fn reference(&self) -> RlpItem {
        if let Node::Empty = self {
            return RlpItem::bytes(Bytes::new());
        }
        let encoded = self.encode();
        if encoded.len() < 32 {
            self.to_item()
        } else {
            RlpItem::bytes(Bytes::copy_from_slice(keccak256(&encoded).as_slice()))
        }
    }

    fn is_hashed(&self) -> bool {
        !matches!(self, Node::Empty) && self.encode().len() >= 32
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatriciaTrie {
    root: Node,
}

impl PatriciaTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the transactions trie of a block: entry `i` is keyed by
    /// `RLP(i)` and holds the transaction's canonical encoding.
    pub fn from_transactions<T: AsRef<[u8]>>(transactions: &[T]) -> Self {
        let mut trie = Self::new();
        for (index, tx) in (0u64..).zip(transactions) {
            trie.insert(&rlp::encode_index(index), tx.as_ref().to_vec());
        }
        trie
    }

    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) {
        let root = std::mem::take(&mut self.root);
        self.root = root.insert(&to_nibbles(key), value);
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.root.get(&to_nibbles(key))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.root, Node::Empty)
    }

    /// The root is always hashed, even when its encoding is short.
    pub fn root_hash(&self) -> B256 {
        if self.is_empty() {
            return EMPTY_ROOT;
        }
        keccak256(self.root.encode())
    }

    /// Encodings of the hashed nodes on the path to `key`, root first.
    /// Inline nodes travel inside their parent's encoding.
    pub fn prove(&self, key: &[u8]) -> Result<Vec<Bytes>, ProofError> {
        let path = to_nibbles(key);
        let mut remaining = path.as_slice();
        let mut node = &self.root;
        let mut proof = vec![Bytes::from(node.encode())];

        loop {
            let next = match node {
                Node::Empty => return Err(ProofError::KeyNotFound),
                Node::Leaf {
                    path: leaf_path, ..
                } => {
                    return if leaf_path.as_slice() == remaining {
                        Ok(proof)
                    } else {
                        Err(ProofError::KeyNotFound)
                    };
                }
                Node::Extension {
                    path: ext_path,
                    child,
                } => {
                    remaining = remaining
                        .strip_prefix(ext_path.as_slice())
                        .ok_or(ProofError::KeyNotFound)?;
                    child.as_ref()
                }
                Node::Branch { children, value } => match remaining.split_first() {
                    None if value.is_some() => return Ok(proof),
                    None => return Err(ProofError::KeyNotFound),
                    Some((first, rest)) => {
                        remaining = rest;
                        &children[usize::from(*first)]
                    }
                },
            };
            if next.is_hashed() {
                proof.push(Bytes::from(next.encode()));
            }
            node = next;
        }
    }
}
