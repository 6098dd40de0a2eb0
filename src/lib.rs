//! # pow-ledger
//!
//! A single-writer, append-only ledger secured by proof of work, with value
//! moved through unspent transaction outputs (UTXOs).
//!
//! ## Layout
//! - `core/`: blocks, the proof-of-work engine, signed transactions, the chain
//!   store with its backward iterator, background mining
//! - `storage/`: the key-value contract the chain is persisted through (sled on
//!   disk, an in-memory map for tests) and the UTXO resolver
//! - `wallet/`: key pairs, addresses and the wallet file
//! - `config/`: defaults, `ledger.toml` and `LEDGER_*` environment overrides
//! - `utils/`: hashing, signing and the bincode encoding
//! - `cli/`: argument parsing for the binary
//!
//! ## Flow
//! A balance query or a transfer asks [`UTXOSet`] to walk the chain backward.
//! A transfer is then built and signed by [`Transaction::new_transfer`] and
//! handed to [`Blockchain::append`], which verifies it, mines a [`Block`] with
//! [`ProofOfWork`] and commits block and tip in one atomic write.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;
pub mod wallet;

pub use cli::{Command, Opt};
pub use config::{Config, Settings, GLOBAL_CONFIG};
pub use core::{
    Block, BlockHeader, Blockchain, BlockchainIterator, MiningJob, PrevTransactions, ProofOfWork,
    TXInput, TXOutput, Transaction, COINBASE_VOUT, DEFAULT_DIFFICULTY_BITS, TIP_BLOCK_HASH_KEY,
};
pub use error::{BlockchainError, Result};
pub use storage::{KvStore, MemoryStore, SledStore, UTXOSet, UtxoView, WriteBatch};
pub use utils::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, hash_pub_key, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    address_to_pub_key_hash, convert_address, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
