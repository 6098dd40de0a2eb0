//! Core ledger functionality
//!
//! Blocks and their proof of work, transactions and their signatures, and the
//! hash-linked chain that stores them.

pub mod block;
pub mod blockchain;
pub mod miner;
pub mod proof_of_work;
pub mod transaction;

pub use block::{Block, BlockHeader};
pub use blockchain::{Blockchain, BlockchainIterator, TIP_BLOCK_HASH_KEY};
pub use miner::MiningJob;
pub use proof_of_work::{ProofOfWork, DEFAULT_DIFFICULTY_BITS};
pub use transaction::{PrevTransactions, TXInput, TXOutput, Transaction, COINBASE_VOUT};
