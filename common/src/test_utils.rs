//! Deterministic blocks and signed transactions for tests across the workspace.

use crate::{
    block::{BlockHeader, RawBlock},
    error::ProofError,
    proof::{AssembledProof, build_inclusion_proof},
    rlp::{self, RlpItem},
    signature::{SignaturePayload, address_of, der_to_eth_signature},
    transaction::{SignedType2Transaction, Type2Transaction},
    trie::PatriciaTrie,
};
use alloy::consensus::Header;
use alloy::primitives::{Address, B256, Bytes, U256};
use k256::ecdsa::{Signature, SigningKey, signature::hazmat::PrehashSigner};

pub const TEST_CHAIN_ID: u64 = 17000;

pub fn signing_key(seed: u8) -> Result<SigningKey, ProofError> {
    SigningKey::from_slice(&[seed; 32])
        .map_err(|e| ProofError::MalformedSignature(format!("invalid test key: {e}")))
}

pub fn address(key: &SigningKey) -> Address {
    address_of(key.verifying_key())
}

pub fn transfer(nonce: u64, destination: Address, amount: u64) -> Type2Transaction {
    Type2Transaction {
        chain_id: TEST_CHAIN_ID,
        nonce,
        max_priority_fee_per_gas: 1_000_000_000,
        max_fee_per_gas: 20_000_000_000,
        gas_limit: 21_000,
        destination,
        amount: U256::from(amount),
        payload: Bytes::new(),
    }
}

/// Signs through the DER path, the way the enclave signer does.
pub fn sign(
    transaction: Type2Transaction,
    key: &SigningKey,
) -> Result<SignedType2Transaction, ProofError> {
    let unsigned = transaction.unsigned_serialize();
    let payload = SignaturePayload::RawMessage(&unsigned);
    let der: Signature = key
        .sign_prehash(payload.digest().as_slice())
        .map_err(|e| ProofError::MalformedSignature(e.to_string()))?;
    let signature = der_to_eth_signature(der.to_der().as_bytes(), &payload, address(key))?;
    Ok(transaction.with_signature(signature))
}

pub fn legacy_transaction() -> Vec<u8> {
    rlp::encode(&RlpItem::List(vec![
        RlpItem::uint(0),
        RlpItem::uint(20_000_000_000),
        RlpItem::uint(21_000),
        RlpItem::bytes(vec![0x35; 20]),
        RlpItem::uint(1_000_000_000),
        RlpItem::bytes(Vec::new()),
        RlpItem::uint(37),
        RlpItem::bytes(vec![0x28; 32]),
        RlpItem::bytes(vec![0x67; 32]),
    ]))
}

#[derive(Debug, Clone)]
pub struct TestBlock {
    pub number: u64,
    pub header: BlockHeader,
    pub transactions: Vec<Vec<u8>>,
    /// `debug_getRawBlock` encoding.
    pub raw: Bytes,
}

impl TestBlock {
    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    pub fn decode(&self) -> Result<RawBlock, ProofError> {
        RawBlock::decode(&self.raw)
    }

    pub fn signed(&self, index: usize) -> Result<SignedType2Transaction, ProofError> {
        let encoded = self.transactions.get(index).ok_or(
            ProofError::TransactionIndexOutOfRange {
                index: u64::try_from(index).unwrap_or(u64::MAX),
                count: self.transactions.len(),
            },
        )?;
        SignedType2Transaction::decode_signed(encoded)
    }

    pub fn prove(&self, index: u64) -> Result<AssembledProof, ProofError> {
        build_inclusion_proof(&self.decode()?, index)
    }

    /// Same transactions under a header claiming another root.
    pub fn with_transactions_root(&self, root: B256) -> Result<Self, ProofError> {
        assemble(self.number, self.transactions.clone(), root)
    }
}

pub fn build_block(number: u64, transactions: Vec<Vec<u8>>) -> Result<TestBlock, ProofError> {
    let root = PatriciaTrie::from_transactions(&transactions).root_hash();
    assemble(number, transactions, root)
}

/// `count` transfers from distinct senders, all at nonce 0.
pub fn block_with_transfers(number: u64, count: u8) -> Result<TestBlock, ProofError> {
    let transactions = (0..count)
        .map(|i| {
            let key = signing_key(i.wrapping_add(1))?;
            let tx = transfer(0, Address::repeat_byte(0xa0 ^ i), 1_000 + u64::from(i));
            sign(tx, &key)?.encoded()
        })
        .collect::<Result<Vec<_>, _>>()?;
    build_block(number, transactions)
}

fn assemble(
    number: u64,
    transactions: Vec<Vec<u8>>,
    transactions_root: B256,
) -> Result<TestBlock, ProofError> {
    let header = Header {
        parent_hash: B256::repeat_byte(0x11),
        number,
        transactions_root,
        gas_limit: 30_000_000,
        timestamp: number.saturating_mul(12).saturating_add(1_700_000_000),
        base_fee_per_gas: Some(7),
        ..Default::default()
    };
    let header_item = rlp::decode(&alloy_rlp::encode(&header))?;

    let tx_items = transactions
        .iter()
        .map(|tx| {
            if tx.first().is_some_and(|byte| *byte >= 0xc0) {
                rlp::decode(tx)
            } else {
                Ok(RlpItem::bytes(tx.clone()))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    let raw = rlp::encode(&RlpItem::List(vec![
        header_item.clone(),
        RlpItem::List(tx_items),
        RlpItem::empty_list(),
    ]));

    Ok(TestBlock {
        number,
        header: BlockHeader::from_item(header_item)?,
        transactions,
        raw: raw.into(),
    })
}
