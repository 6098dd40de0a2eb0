//! Data storage and persistence
//!
//! The ledger talks to its backing medium only through [`KvStore`]: point reads
//! plus atomic write batches guarded by a compare-and-swap on one key. sled backs
//! the on-disk chain, [`MemoryStore`] backs tests. The UTXO resolver lives here
//! too, since it is a derived view over stored blocks.

pub mod memory_store;
pub mod sled_store;
pub mod utxo_set;

pub use memory_store::MemoryStore;
pub use sled_store::SledStore;
pub use utxo_set::{UTXOSet, UtxoView};

use crate::error::Result;

/// A set of writes applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    guard: Option<(Vec<u8>, Option<Vec<u8>>)>,
    puts: Vec<(Vec<u8>, Vec<u8>)>,
}

impl WriteBatch {
    pub fn new() -> WriteBatch {
        WriteBatch::default()
    }

    /// Only apply the batch if `key` still holds `expected` (`None`: key absent).
    pub fn expect(mut self, key: &[u8], expected: Option<&[u8]>) -> WriteBatch {
        self.guard = Some((key.to_vec(), expected.map(<[u8]>::to_vec)));
        self
    }

    pub fn put(mut self, key: &[u8], value: &[u8]) -> WriteBatch {
        self.puts.push((key.to_vec(), value.to_vec()));
        self
    }

    pub fn guard(&self) -> Option<(&[u8], Option<&[u8]>)> {
        self.guard
            .as_ref()
            .map(|(key, expected)| (key.as_slice(), expected.as_deref()))
    }

    pub fn puts(&self) -> &[(Vec<u8>, Vec<u8>)] {
        self.puts.as_slice()
    }
}

/// The transactional key-value contract the chain is persisted through.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Applies every put atomically. A failed guard applies nothing and returns
    /// `StaleTip`; medium failures return `StorageUnavailable`.
    fn apply(&self, batch: WriteBatch) -> Result<()>;
}
