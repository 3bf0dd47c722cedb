use crate::{
    error::ProofError,
    rlp::{self, RlpItem},
};
use alloy::primitives::{B256, Bytes, keccak256};

const PARENT_HASH: usize = 0;
const STATE_ROOT: usize = 3;
const TRANSACTIONS_ROOT: usize = 4;
const RECEIPTS_ROOT: usize = 5;
const NUMBER: usize = 8;
const TIMESTAMP: usize = 11;
const BASE_FEE_PER_GAS: usize = 15;

/// Fields up to and including the PoW nonce; later forks only append.
const MIN_FIELDS: usize = 15;

/// A block header kept as its raw field list, so that forks adding trailing
/// fields still hash to the block hash without this type knowing about them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    fields: Vec<Bytes>,
}

impl BlockHeader {
    pub fn parse(encoded: &[u8]) -> Result<Self, ProofError> {
        Self::from_item(rlp::decode(encoded)?)
    }

    pub fn from_item(item: RlpItem) -> Result<Self, ProofError> {
        let fields = item
            .into_list()?
            .into_iter()
            .map(|field| match field {
                RlpItem::Bytes(bytes) => Ok(bytes),
                RlpItem::List(_) => Err(ProofError::MalformedEncoding(
                    "block header field is a list".to_string(),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;

        if fields.len() < MIN_FIELDS {
            return Err(ProofError::MalformedEncoding(format!(
                "block header has {} fields, expected at least {MIN_FIELDS}",
                fields.len()
            )));
        }
        let header = Self { fields };
        header.hash_field(TRANSACTIONS_ROOT)?;
        header.number()?;
        Ok(header)
    }

    pub fn serialize(&self) -> Vec<u8> {
        rlp::encode(&self.to_item())
    }

    pub fn to_item(&self) -> RlpItem {
        RlpItem::List(self.fields.iter().cloned().map(RlpItem::Bytes).collect())
    }

    pub fn hash(&self) -> B256 {
        keccak256(self.serialize())
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn parent_hash(&self) -> Result<B256, ProofError> {
        self.hash_field(PARENT_HASH)
    }

    pub fn state_root(&self) -> Result<B256, ProofError> {
        self.hash_field(STATE_ROOT)
    }

    pub fn transactions_root(&self) -> B256 {
        // validated in `from_item`
        B256::from_slice(&self.fields[TRANSACTIONS_ROOT])
    }

    pub fn receipts_root(&self) -> Result<B256, ProofError> {
        self.hash_field(RECEIPTS_ROOT)
    }

    pub fn number(&self) -> Result<u64, ProofError> {
        self.uint_field(NUMBER)
    }

    pub fn timestamp(&self) -> Result<u64, ProofError> {
        self.uint_field(TIMESTAMP)
    }

    pub fn base_fee_per_gas(&self) -> Option<u64> {
        self.fields.get(BASE_FEE_PER_GAS).and_then(|field| {
            RlpItem::Bytes(field.clone()).as_u64().ok()
        })
    }

    fn hash_field(&self, index: usize) -> Result<B256, ProofError> {
        RlpItem::Bytes(self.fields[index].clone()).as_b256()
    }

    fn uint_field(&self, index: usize) -> Result<u64, ProofError> {
        RlpItem::Bytes(self.fields[index].clone()).as_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::consensus::Header;
    use alloy::primitives::{Address, B64, Bloom, U256};

    fn london_header() -> Header {
        Header {
            parent_hash: B256::repeat_byte(0x01),
            ommers_hash: B256::repeat_byte(0x02),
            beneficiary: Address::repeat_byte(0x03),
            state_root: B256::repeat_byte(0x04),
            transactions_root: B256::repeat_byte(0x05),
            receipts_root: B256::repeat_byte(0x06),
            logs_bloom: Bloom::default(),
            difficulty: U256::ZERO,
            number: 21_000_123,
            gas_limit: 30_000_000,
            gas_used: 12_345_678,
            timestamp: 1_735_689_600,
            extra_data: Bytes::from_static(b"builder"),
            mix_hash: B256::repeat_byte(0x07),
            nonce: B64::ZERO,
            base_fee_per_gas: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_matches_reference_hash() {
        let header = london_header();
        let encoded = alloy_rlp::encode(&header);

        let parsed = BlockHeader::parse(&encoded).unwrap();
        assert_eq!(parsed.serialize(), encoded);
        assert_eq!(parsed.hash(), header.hash_slow());
        assert_eq!(parsed.transactions_root(), header.transactions_root);
        assert_eq!(parsed.number().unwrap(), 21_000_123);
        assert_eq!(parsed.timestamp().unwrap(), 1_735_689_600);
        assert_eq!(parsed.base_fee_per_gas(), Some(7));
        assert_eq!(parsed.field_count(), 16);
    }

    #[test]
    fn test_preserves_post_cancun_fields() {
        let header = Header {
            withdrawals_root: Some(B256::repeat_byte(0x08)),
            blob_gas_used: Some(131_072),
            excess_blob_gas: Some(0),
            parent_beacon_block_root: Some(B256::repeat_byte(0x09)),
            requests_hash: Some(B256::repeat_byte(0x0a)),
            ..london_header()
        };
        let encoded = alloy_rlp::encode(&header);
        let parsed = BlockHeader::parse(&encoded).unwrap();
        assert_eq!(parsed.field_count(), 21);
        assert_eq!(parsed.serialize(), encoded);
        assert_eq!(parsed.hash(), header.hash_slow());
    }

    #[test]
    fn test_rejects_short_or_malformed_headers() {
        let short = RlpItem::List(vec![RlpItem::bytes(vec![0u8; 32]); 10]);
        assert!(BlockHeader::parse(&rlp::encode(&short)).is_err());

        let mut fields = vec![RlpItem::bytes(vec![0u8; 32]); 15];
        fields[4] = RlpItem::bytes(vec![0u8; 31]);
        assert!(BlockHeader::parse(&rlp::encode(&RlpItem::List(fields))).is_err());

        let mut fields = vec![RlpItem::bytes(vec![0u8; 32]); 15];
        fields[8] = RlpItem::empty_list();
        assert!(BlockHeader::parse(&rlp::encode(&RlpItem::List(fields))).is_err());

        assert!(BlockHeader::parse(&[0x80]).is_err());
    }
}
