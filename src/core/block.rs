use crate::core::{ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize, sha256_digest};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

/// The fields a block's proof of work commits to, apart from the nonce.
/// `hash` is deliberately absent: it is the output of hashing this header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub prev_hash: Vec<u8>,
    pub tx_digest: Vec<u8>,
    pub timestamp: i64,
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Block {
    timestamp: i64,
    transactions: Vec<Transaction>,
    prev_hash: Vec<u8>,
    hash: Vec<u8>,
    nonce: u64,
}

impl Block {
    /// Mines a block on top of `prev_hash`. An empty `prev_hash` makes a genesis block.
    pub fn new_block(
        prev_hash: &[u8],
        transactions: &[Transaction],
        pow: &ProofOfWork,
    ) -> Result<Block> {
        Self::mine(prev_hash, transactions, pow, None)
    }

    /// Like [`Block::new_block`], giving up with `MiningCancelled` once `cancel` is set.
    pub fn new_block_cancellable(
        prev_hash: &[u8],
        transactions: &[Transaction],
        pow: &ProofOfWork,
        cancel: &AtomicBool,
    ) -> Result<Block> {
        Self::mine(prev_hash, transactions, pow, Some(cancel))
    }

    fn mine(
        prev_hash: &[u8],
        transactions: &[Transaction],
        pow: &ProofOfWork,
        cancel: Option<&AtomicBool>,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let header = BlockHeader {
            prev_hash: prev_hash.to_vec(),
            tx_digest: Self::hash_transactions(transactions),
            timestamp: current_timestamp()?,
        };

        info!(
            "Starting proof-of-work for block with {} transactions (difficulty: {} bits)",
            transactions.len(),
            pow.get_difficulty_bits()
        );
        let (nonce, hash) = pow.run(&header, cancel)?;
        info!("Proof-of-work completed for block: {}", HEXLOWER.encode(&hash));

        Ok(Block {
            timestamp: header.timestamp,
            transactions: transactions.to_vec(),
            prev_hash: header.prev_hash,
            hash,
            nonce,
        })
    }

    pub fn generate_genesis_block(coinbase: &Transaction, pow: &ProofOfWork) -> Result<Block> {
        Block::new_block(&[], std::slice::from_ref(coinbase), pow)
    }

    /// Assembles a block from already mined parts without doing any work.
    /// Nothing is checked here; run it through [`ProofOfWork::validate`].
    pub fn from_parts(
        timestamp: i64,
        transactions: Vec<Transaction>,
        prev_hash: Vec<u8>,
        hash: Vec<u8>,
        nonce: u64,
    ) -> Block {
        Block {
            timestamp,
            transactions,
            prev_hash,
            hash,
            nonce,
        }
    }

    /// SHA-256 over the concatenated transaction ids, in block order.
    pub fn hash_transactions(transactions: &[Transaction]) -> Vec<u8> {
        let mut tx_ids = vec![];
        for transaction in transactions {
            tx_ids.extend_from_slice(transaction.get_id());
        }
        sha256_digest(tx_ids.as_slice())
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            prev_hash: self.prev_hash.clone(),
            tx_digest: Self::hash_transactions(&self.transactions),
            timestamp: self.timestamp,
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_prev_hash(&self) -> &[u8] {
        self.prev_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_hash_hex(&self) -> String {
        HEXLOWER.encode(&self.hash)
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn easy_pow() -> ProofOfWork {
        ProofOfWork::new(8).unwrap()
    }

    #[test]
    fn test_new_block_is_valid() {
        let pow = easy_pow();
        let coinbase = Transaction::new_coinbase_tx(b"pkh-a", "genesis", 10).unwrap();
        let block = Block::generate_genesis_block(&coinbase, &pow).unwrap();

        assert!(block.is_genesis());
        assert_eq!(block.get_hash().len(), 32);
        assert!(pow.validate(&block));
    }

    #[test]
    fn test_empty_block_rejected() {
        let result = Block::new_block(&[], &[], &easy_pow());
        assert!(matches!(result, Err(BlockchainError::InvalidBlock(_))));
    }

    #[test]
    fn test_transactions_digest_uses_id_bytes() {
        let a = Transaction::new_coinbase_tx(b"pkh-a", "one", 10).unwrap();
        let b = Transaction::new_coinbase_tx(b"pkh-b", "two", 10).unwrap();

        // Same count, different content: digests must differ
        assert_ne!(
            Block::hash_transactions(std::slice::from_ref(&a)),
            Block::hash_transactions(std::slice::from_ref(&b))
        );

        let mut concatenated = a.get_id().to_vec();
        concatenated.extend_from_slice(b.get_id());
        assert_eq!(
            Block::hash_transactions(&[a.clone(), b.clone()]),
            sha256_digest(&concatenated)
        );
        assert_ne!(
            Block::hash_transactions(&[a.clone(), b.clone()]),
            Block::hash_transactions(&[b, a])
        );
    }

    #[test]
    fn test_serialization_round_trip_preserves_hashes() {
        let pow = easy_pow();
        let coinbase = Transaction::new_coinbase_tx(b"pkh-a", "genesis", 10).unwrap();
        let genesis = Block::generate_genesis_block(&coinbase, &pow).unwrap();
        let spend = Transaction::new_coinbase_tx(b"pkh-b", "next", 10).unwrap();
        let block = Block::new_block(genesis.get_hash(), &[spend], &pow).unwrap();

        let decoded = Block::deserialize(&block.serialize().unwrap()).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.get_prev_hash(), genesis.get_hash());
        assert!(pow.validate(&decoded));
    }
}
