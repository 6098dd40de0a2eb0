//! Error handling for the ledger
//!
//! Every fallible operation in the crate returns [`Result`]. Storage and proof
//! failures abort the operation they occur in; fund and signature failures are
//! ordinary outcomes the caller can report and move on from.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    /// The backing key-value medium could not be opened, read or written
    StorageUnavailable(String),
    /// A tip mutation raced with another writer and was refused
    StaleTip,
    /// No chain exists in the backing medium yet
    ChainNotFound,
    /// A block named by the tip or a `prev_hash` link is missing or unreadable, or
    /// a stored transaction no longer matches its id
    CorruptChain(String),
    /// Requested transfer exceeds what the address can spend
    InsufficientFunds { required: u64, available: u64 },
    /// A block's stored nonce/hash does not satisfy the proof-of-work target
    InvalidProof(String),
    /// A transaction failed signature verification
    InvalidSignature(String),
    /// Block structure or linkage errors
    InvalidBlock(String),
    /// Every nonce was tried without meeting the target
    MiningExhausted,
    /// Mining was stopped through its cancellation flag
    MiningCancelled,
    /// The mining worker could not be started or died
    Mining(String),
    /// Structural, balance or double-spend violations in a transaction
    Transaction(String),
    Serialization(String),
    Crypto(String),
    InvalidAddress(String),
    Wallet(String),
    Config(String),
    Io(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::StorageUnavailable(msg) => write!(f, "Storage unavailable: {msg}"),
            BlockchainError::StaleTip => {
                write!(f, "Chain tip changed while the block was being committed")
            }
            BlockchainError::ChainNotFound => {
                write!(f, "No existing blockchain found. Create one first.")
            }
            BlockchainError::CorruptChain(msg) => write!(f, "Corrupt chain: {msg}"),
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::InvalidProof(msg) => write!(f, "Invalid proof of work: {msg}"),
            BlockchainError::InvalidSignature(msg) => write!(f, "Invalid signature: {msg}"),
            BlockchainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            BlockchainError::MiningExhausted => {
                write!(f, "Mining space exhausted without meeting the target")
            }
            BlockchainError::MiningCancelled => write!(f, "Mining was cancelled"),
            BlockchainError::Mining(msg) => write!(f, "Mining error: {msg}"),
            BlockchainError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::StorageUnavailable(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}
