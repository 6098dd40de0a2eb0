use crate::error::{BlockchainError, Result};
use crate::storage::{KvStore, WriteBatch};
use std::collections::HashMap;
use std::sync::RwLock;

/// A [`KvStore`] kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes one key directly, bypassing batches. Lets tests plant corrupt data.
    pub fn insert_raw(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}

fn poisoned() -> BlockchainError {
    BlockchainError::StorageUnavailable("Memory store lock poisoned".to_string())
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(key).cloned())
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        if let Some((key, expected)) = batch.guard() {
            if map.get(key).map(Vec::as_slice) != expected {
                return Err(BlockchainError::StaleTip);
            }
        }
        for (key, value) in batch.puts() {
            map.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_on_absent_key() {
        let store = MemoryStore::new();
        let create = WriteBatch::new().expect(b"l", None).put(b"l", b"genesis");

        store.apply(create.clone()).unwrap();
        assert_eq!(store.apply(create), Err(BlockchainError::StaleTip));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unguarded_batch_overwrites() {
        let store = MemoryStore::new();
        store.apply(WriteBatch::new().put(b"k", b"1")).unwrap();
        store.apply(WriteBatch::new().put(b"k", b"2")).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"2".to_vec()));
    }
}
