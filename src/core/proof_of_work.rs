use crate::core::{Block, BlockHeader};
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::debug;
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;
use std::sync::atomic::{AtomicBool, Ordering};

pub const DEFAULT_DIFFICULTY_BITS: u32 = 24;

// Largest nonce tried before the search gives up
const MAX_NONCE: u64 = i64::MAX as u64;

/// A fixed-difficulty proof-of-work engine: a hash is accepted when, read as a
/// big-endian integer, it is strictly below `2^(256 - difficulty_bits)`.
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    target: BigInt,
    difficulty_bits: u32,
}

impl ProofOfWork {
    pub fn new(difficulty_bits: u32) -> Result<ProofOfWork> {
        if difficulty_bits == 0 || difficulty_bits >= 256 {
            return Err(BlockchainError::Config(format!(
                "Difficulty must be between 1 and 255 bits, got {difficulty_bits}"
            )));
        }
        // I shift 1 left so each extra bit of difficulty halves the target
        let mut target = BigInt::from(1);
        target.shl_assign(256 - difficulty_bits);
        Ok(ProofOfWork {
            target,
            difficulty_bits,
        })
    }

    pub fn get_difficulty_bits(&self) -> u32 {
        self.difficulty_bits
    }

    /// prev_hash ‖ tx_digest ‖ timestamp ‖ difficulty_bits ‖ nonce, integers big-endian
    fn prepare_data(&self, header: &BlockHeader, nonce: u64) -> Vec<u8> {
        let mut data_bytes = vec![];
        data_bytes.extend(header.prev_hash.as_slice());
        data_bytes.extend(header.tx_digest.as_slice());
        data_bytes.extend(header.timestamp.to_be_bytes());
        data_bytes.extend(i64::from(self.difficulty_bits).to_be_bytes());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(Sign::Plus, hash) < self.target
    }

    /// Searches nonces upward from zero and returns the first one whose hash meets
    /// the target. `cancel` is polled before every attempt.
    pub fn run(
        &self,
        header: &BlockHeader,
        cancel: Option<&AtomicBool>,
    ) -> Result<(u64, Vec<u8>)> {
        self.search(header, cancel, MAX_NONCE)
    }

    fn search(
        &self,
        header: &BlockHeader,
        cancel: Option<&AtomicBool>,
        max_nonce: u64,
    ) -> Result<(u64, Vec<u8>)> {
        let mut nonce = 0;
        while nonce < max_nonce {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                debug!("Mining cancelled after {nonce} attempts");
                return Err(BlockchainError::MiningCancelled);
            }

            let hash = sha256_digest(self.prepare_data(header, nonce).as_slice());
            if self.meets_target(&hash) {
                debug!("Found nonce {nonce}: {}", HEXLOWER.encode(&hash));
                return Ok((nonce, hash));
            }
            nonce += 1;
        }
        Err(BlockchainError::MiningExhausted)
    }

    /// Recomputes the block's hash from its stored nonce. Valid only when it matches
    /// the stored hash and is below the target.
    pub fn validate(&self, block: &Block) -> bool {
        let data = self.prepare_data(&block.header(), block.get_nonce());
        let hash = sha256_digest(data.as_slice());
        hash.as_slice() == block.get_hash() && self.meets_target(&hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    fn mined_block(pow: &ProofOfWork) -> Block {
        let coinbase = Transaction::new_coinbase_tx(b"pkh-a", "genesis", 10).unwrap();
        Block::generate_genesis_block(&coinbase, pow).unwrap()
    }

    fn header() -> BlockHeader {
        BlockHeader {
            prev_hash: vec![7; 32],
            tx_digest: sha256_digest(b"transactions"),
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_difficulty_bounds() {
        assert!(ProofOfWork::new(0).is_err());
        assert!(ProofOfWork::new(256).is_err());
        assert!(ProofOfWork::new(1).is_ok());
        assert!(ProofOfWork::new(255).is_ok());
    }

    #[test]
    fn test_higher_difficulty_has_smaller_target() {
        let easy = ProofOfWork::new(4).unwrap();
        let hard = ProofOfWork::new(12).unwrap();
        assert!(hard.target < easy.target);
    }

    #[test]
    fn test_mined_block_validates() {
        let pow = ProofOfWork::new(8).unwrap();
        let block = mined_block(&pow);
        assert!(pow.validate(&block));
    }

    #[test]
    fn test_search_returns_first_satisfying_nonce() {
        let pow = ProofOfWork::new(8).unwrap();
        let header = header();
        let (nonce, hash) = pow.run(&header, None).unwrap();

        for earlier in 0..nonce {
            let candidate = sha256_digest(&pow.prepare_data(&header, earlier));
            assert!(!pow.meets_target(&candidate));
        }
        assert_eq!(hash, sha256_digest(&pow.prepare_data(&header, nonce)));

        // Deterministic for identical inputs
        assert_eq!(pow.run(&header, None).unwrap(), (nonce, hash));
    }

    #[test]
    fn test_tampered_hash_bit_fails_validation() {
        let pow = ProofOfWork::new(8).unwrap();
        let block = mined_block(&pow);

        for byte in [0usize, 15, 31] {
            let mut hash = block.get_hash().to_vec();
            hash[byte] ^= 0x01;
            let tampered = Block::from_parts(
                block.get_timestamp(),
                block.get_transactions().to_vec(),
                block.get_prev_hash().to_vec(),
                hash,
                block.get_nonce(),
            );
            assert!(!pow.validate(&tampered));
        }
    }

    #[test]
    fn test_tampered_nonce_fails_validation() {
        let pow = ProofOfWork::new(8).unwrap();
        let block = mined_block(&pow);

        let tampered = Block::from_parts(
            block.get_timestamp(),
            block.get_transactions().to_vec(),
            block.get_prev_hash().to_vec(),
            block.get_hash().to_vec(),
            block.get_nonce() ^ 0x01,
        );
        assert!(!pow.validate(&tampered));
    }

    #[test]
    fn test_validation_depends_on_difficulty() {
        let easy = ProofOfWork::new(8).unwrap();
        let block = mined_block(&easy);

        // The difficulty is part of the hashed payload
        let other = ProofOfWork::new(9).unwrap();
        assert!(!other.validate(&block));
    }

    #[test]
    fn test_exhausted_search() {
        let pow = ProofOfWork::new(255).unwrap();
        let result = pow.search(&header(), None, 16);
        assert_eq!(result, Err(BlockchainError::MiningExhausted));
    }

    #[test]
    fn test_cancelled_search() {
        let pow = ProofOfWork::new(255).unwrap();
        let cancel = AtomicBool::new(true);
        let result = pow.run(&header(), Some(&cancel));
        assert_eq!(result, Err(BlockchainError::MiningCancelled));
    }
}
