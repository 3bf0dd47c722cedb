//! Recursive-length-prefix items over `alloy_rlp` headers.
//!
//! `alloy_rlp` is strongly typed; proofs and raw blocks need an untyped view
//! where each item is either a byte string or a list, and where re-encoding
//! reproduces the input byte for byte.

use crate::error::ProofError;
use alloy::primitives::{Address, B256, Bytes, U256};
use alloy_rlp::{BufMut, Encodable, Header};

/// Nesting deeper than this is not produced by any header, block or trie node.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlpItem {
    Bytes(Bytes),
    List(Vec<RlpItem>),
}

impl RlpItem {
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        RlpItem::Bytes(data.into())
    }

    pub fn empty_list() -> Self {
        RlpItem::List(Vec::new())
    }

    /// Minimal big-endian encoding, zero is the empty string.
    pub fn uint(value: u64) -> Self {
        RlpItem::Bytes(Bytes::copy_from_slice(trim_leading_zeros(&value.to_be_bytes())))
    }

    pub fn uint256(value: U256) -> Self {
        let bytes: [u8; 32] = value.to_be_bytes();
        RlpItem::Bytes(Bytes::copy_from_slice(trim_leading_zeros(&bytes)))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, RlpItem::List(_))
    }

    pub fn as_bytes(&self) -> Result<&Bytes, ProofError> {
        match self {
            RlpItem::Bytes(bytes) => Ok(bytes),
            RlpItem::List(_) => Err(ProofError::MalformedEncoding(
                "expected byte string, found list".to_string(),
            )),
        }
    }

    pub fn as_list(&self) -> Result<&[RlpItem], ProofError> {
        match self {
            RlpItem::List(items) => Ok(items),
            RlpItem::Bytes(_) => Err(ProofError::MalformedEncoding(
                "expected list, found byte string".to_string(),
            )),
        }
    }

    pub fn into_list(self) -> Result<Vec<RlpItem>, ProofError> {
        match self {
            RlpItem::List(items) => Ok(items),
            RlpItem::Bytes(_) => Err(ProofError::MalformedEncoding(
                "expected list, found byte string".to_string(),
            )),
        }
    }

    pub fn as_u64(&self) -> Result<u64, ProofError> {
        let bytes = self.as_canonical_uint(8)?;
        let mut buf = [0u8; 8];
        buf[8 - bytes.len()..].copy_from_slice(bytes);
        Ok(u64::from_be_bytes(buf))
    }

    pub fn as_u128(&self) -> Result<u128, ProofError> {
        let bytes = self.as_canonical_uint(16)?;
        let mut buf = [0u8; 16];
        buf[16 - bytes.len()..].copy_from_slice(bytes);
        Ok(u128::from_be_bytes(buf))
    }

    pub fn as_u256(&self) -> Result<U256, ProofError> {
        let bytes = self.as_canonical_uint(32)?;
        Ok(U256::from_be_slice(bytes))
    }

    pub fn as_address(&self) -> Result<Address, ProofError> {
        let bytes = self.as_bytes()?;
        if bytes.len() != 20 {
            return Err(ProofError::MalformedEncoding(format!(
                "expected 20 byte address, got {} bytes",
                bytes.len()
            )));
        }
        Ok(Address::from_slice(bytes))
    }

    pub fn as_b256(&self) -> Result<B256, ProofError> {
        let bytes = self.as_bytes()?;
        if bytes.len() != 32 {
            return Err(ProofError::MalformedEncoding(format!(
                "expected 32 byte hash, got {} bytes",
                bytes.len()
            )));
        }
        Ok(B256::from_slice(bytes))
    }

    fn as_canonical_uint(&self, max_len: usize) -> Result<&[u8], ProofError> {
        let bytes = self.as_bytes()?;
        if bytes.len() > max_len {
            return Err(ProofError::MalformedEncoding(format!(
                "integer of {} bytes exceeds {max_len} bytes",
                bytes.len()
            )));
        }
        if bytes.first() == Some(&0) {
            return Err(ProofError::MalformedEncoding(
                "integer has leading zero bytes".to_string(),
            ));
        }
        Ok(bytes)
    }

    fn payload_length(items: &[RlpItem]) -> usize {
        items.iter().map(Encodable::length).sum()
    }
}

impl Encodable for RlpItem {
    fn encode(&self, out: &mut dyn BufMut) {
        match self {
            RlpItem::Bytes(bytes) => {
                let bytes: &[u8] = bytes;
                bytes.encode(out);
            }
            RlpItem::List(items) => {
                Header {
                    list: true,
                    payload_length: Self::payload_length(items),
                }
                .encode(out);
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    fn length(&self) -> usize {
        match self {
            RlpItem::Bytes(bytes) => {
                let bytes: &[u8] = bytes;
                bytes.length()
            }
            RlpItem::List(items) => {
                let payload_length = Self::payload_length(items);
                payload_length + alloy_rlp::length_of_length(payload_length)
            }
        }
    }
}

pub fn encode(item: &RlpItem) -> Vec<u8> {
    let mut out = Vec::with_capacity(item.length());
    item.encode(&mut out);
    out
}

/// Decodes exactly one item. Trailing bytes, non-canonical prefixes and
/// truncated input are all `MalformedEncoding`.
pub fn decode(data: &[u8]) -> Result<RlpItem, ProofError> {
    let mut buf = data;
    let item = decode_item(&mut buf, 0)?;
    if !buf.is_empty() {
        return Err(ProofError::MalformedEncoding(format!(
            "{} trailing bytes after item",
            buf.len()
        )));
    }
    Ok(item)
}

fn decode_item(buf: &mut &[u8], depth: usize) -> Result<RlpItem, ProofError> {
    if depth > MAX_DEPTH {
        return Err(ProofError::MalformedEncoding(format!(
            "nesting exceeds {MAX_DEPTH} levels"
        )));
    }
    let header =
        Header::decode(buf).map_err(|e| ProofError::MalformedEncoding(format!("{e}")))?;
    let payload = buf.get(..header.payload_length).ok_or_else(|| {
        ProofError::MalformedEncoding(format!(
            "payload of {} bytes truncated to {}",
            header.payload_length,
            buf.len()
        ))
    })?;
    *buf = &buf[header.payload_length..];

    if !header.list {
        return Ok(RlpItem::Bytes(Bytes::copy_from_slice(payload)));
    }

    let mut inner = payload;
    let mut items = Vec::new();
    while !inner.is_empty() {
        items.push(decode_item(&mut inner, depth + 1)?);
    }
    Ok(RlpItem::List(items))
}

/// Trie key for the transaction at `index`: RLP of the minimal big-endian
/// integer, so index 0 is `0x80`.
pub fn encode_index(index: u64) -> Vec<u8> {
    encode(&RlpItem::uint(index))
}

pub fn decode_index(key: &[u8]) -> Result<u64, ProofError> {
    decode(key)?.as_u64()
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}
