//! EIP-1559 (type 2) transactions as signed by the encumbrance wallets.
//! Access lists are always empty, wallets never populate them.

use crate::{
    error::ProofError,
    rlp::{self, RlpItem},
    signature::EthSignature,
};
use alloy::primitives::{Address, B256, Bytes, U256, keccak256};
use serde::{Deserialize, Serialize};

pub const TYPE2_TX_TYPE: u8 = 0x02;

const SIGNED_FIELDS: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Type2Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
    pub gas_limit: u64,
    pub destination: Address,
    pub amount: U256,
    pub payload: Bytes,
}

impl Type2Transaction {
    fn fields(&self) -> Vec<RlpItem> {
        vec![
            RlpItem::uint(self.chain_id),
            RlpItem::uint(self.nonce),
            RlpItem::uint256(U256::from(self.max_priority_fee_per_gas)),
            RlpItem::uint256(U256::from(self.max_fee_per_gas)),
            RlpItem::uint(self.gas_limit),
            RlpItem::bytes(self.destination.to_vec()),
            RlpItem::uint256(self.amount),
            RlpItem::Bytes(self.payload.clone()),
            RlpItem::empty_list(),
        ]
    }

    /// `0x02 || rlp([chainId, nonce, ..., data, accessList])`
    pub fn unsigned_serialize(&self) -> Vec<u8> {
        typed_envelope(&RlpItem::List(self.fields()))
    }

    pub fn signing_hash(&self) -> B256 {
        keccak256(self.unsigned_serialize())
    }

    pub fn signed_serialize(&self, signature: &EthSignature) -> Result<Vec<u8>, ProofError> {
        let mut fields = self.fields();
        fields.push(RlpItem::uint(u64::from(signature.y_parity()?)));
        fields.push(RlpItem::uint256(signature.r_u256()));
        fields.push(RlpItem::uint256(signature.s_u256()));
        Ok(typed_envelope(&RlpItem::List(fields)))
    }

    /// Upper bound the sender pays: `gas_limit * max_fee_per_gas + amount`.
    pub fn cost(&self) -> U256 {
        U256::from(self.gas_limit)
            .saturating_mul(U256::from(self.max_fee_per_gas))
            .saturating_add(self.amount)
    }

    pub fn with_signature(self, signature: EthSignature) -> SignedType2Transaction {
        SignedType2Transaction {
            transaction: self,
            signature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedType2Transaction {
    pub transaction: Type2Transaction,
    pub signature: EthSignature,
}

impl SignedType2Transaction {
    pub fn encoded(&self) -> Result<Vec<u8>, ProofError> {
        self.transaction.signed_serialize(&self.signature)
    }

    /// The hash the chain indexes the transaction under.
    pub fn hash(&self) -> Result<B256, ProofError> {
        Ok(keccak256(self.encoded()?))
    }

    pub fn recover_signer(&self) -> Result<Address, ProofError> {
        self.signature.recover(self.transaction.signing_hash())
    }

    /// Parses the canonical signed encoding as found in a transactions trie.
    pub fn decode_signed(encoded: &[u8]) -> Result<Self, ProofError> {
        let tx_type = transaction_type(encoded)?;
        if tx_type != TYPE2_TX_TYPE {
            return Err(ProofError::UnsupportedTransactionType(tx_type));
        }
        let items = rlp::decode(&encoded[1..])?.into_list()?;
        if items.len() != SIGNED_FIELDS {
            return Err(ProofError::MalformedEncoding(format!(
                "type 2 transaction has {} fields, expected {SIGNED_FIELDS}",
                items.len()
            )));
        }
        if !items[8].as_list()?.is_empty() {
            return Err(ProofError::MalformedEncoding(
                "non-empty access lists are not supported".to_string(),
            ));
        }

        let transaction = Type2Transaction {
            chain_id: items[0].as_u64()?,
            nonce: items[1].as_u64()?,
            max_priority_fee_per_gas: items[2].as_u128()?,
            max_fee_per_gas: items[3].as_u128()?,
            gas_limit: items[4].as_u64()?,
            destination: items[5].as_address()?,
            amount: items[6].as_u256()?,
            payload: items[7].as_bytes()?.clone(),
        };
        let y_parity = match items[9].as_u64()? {
            0 => false,
            1 => true,
            other => {
                return Err(ProofError::MalformedSignature(format!(
                    "y parity must be 0 or 1, got {other}"
                )));
            }
        };
        let signature = EthSignature::from_parity(
            B256::from(items[10].as_u256()?),
            B256::from(items[11].as_u256()?),
            y_parity,
        );

        Ok(Self {
            transaction,
            signature,
        })
    }
}

/// EIP-2718 type of an encoded transaction, 0 for legacy RLP lists.
pub fn transaction_type(encoded: &[u8]) -> Result<u8, ProofError> {
    match encoded.first() {
        None => Err(ProofError::MalformedEncoding(
            "empty transaction".to_string(),
        )),
        Some(byte) if *byte >= 0xc0 => Ok(0),
        Some(byte) if *byte <= 0x7f => Ok(*byte),
        Some(byte) => Err(ProofError::MalformedEncoding(format!(
            "invalid transaction type byte 0x{byte:02x}"
        ))),
    }
}

fn typed_envelope(list: &RlpItem) -> Vec<u8> {
    let body = rlp::encode(list);
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(TYPE2_TX_TYPE);
    out.extend(body);
    out
}
