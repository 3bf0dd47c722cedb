use super::BlockHeader;
use crate::{
    error::ProofError,
    rlp::{self, RlpItem},
};

/// A block as returned by `debug_getRawBlock`: `[header, transactions, ...]`.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub header: BlockHeader,
    /// Canonical encodings as inserted into the transactions trie.
    pub transactions: Vec<Vec<u8>>,
}

impl RawBlock {
    pub fn decode(encoded: &[u8]) -> Result<Self, ProofError> {
        let mut items = rlp::decode(encoded)?.into_list()?.into_iter();
        let header = items.next().ok_or_else(|| {
            ProofError::MalformedEncoding("raw block has no header".to_string())
        })?;
        let transactions = items.next().ok_or_else(|| {
            ProofError::MalformedEncoding("raw block has no transaction list".to_string())
        })?;

        let header = BlockHeader::from_item(header)?;
        // Typed transactions are wrapped in a byte string, legacy ones are
        // inlined as lists and must be re-encoded for the trie.
        let transactions = transactions
            .into_list()?
            .into_iter()
            .map(|tx| match tx {
                RlpItem::Bytes(typed) => typed.to_vec(),
                legacy @ RlpItem::List(_) => rlp::encode(&legacy),
            })
            .collect();

        Ok(Self {
            header,
            transactions,
        })
    }

    pub fn transaction(&self, index: u64) -> Result<&[u8], ProofError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.transactions.get(i))
            .map(Vec::as_slice)
            .ok_or(ProofError::TransactionIndexOutOfRange {
                index,
                count: self.transactions.len(),
            })
    }
}
