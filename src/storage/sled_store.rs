use crate::error::{BlockchainError, Result};
use crate::storage::{KvStore, WriteBatch};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Tree};
use std::path::{Path, PathBuf};

const BLOCKS_TREE: &str = "blocks";

/// The on-disk store: one sled tree holding blocks by hash plus the tip key.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    tree: Tree,
    path: PathBuf,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<SledStore> {
        let db = sled::open(path).map_err(|e| {
            BlockchainError::StorageUnavailable(format!(
                "Failed to open database at {}: {e}",
                path.display()
            ))
        })?;
        let tree = db.open_tree(BLOCKS_TREE).map_err(|e| {
            BlockchainError::StorageUnavailable(format!("Failed to open blocks tree: {e}"))
        })?;
        Ok(SledStore {
            db,
            tree,
            path: path.to_path_buf(),
        })
    }

    pub fn get_path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self
            .tree
            .get(key)
            .map_err(|e| BlockchainError::StorageUnavailable(format!("Failed to read key: {e}")))?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        let result: std::result::Result<(), TransactionError<()>> =
            self.tree.transaction(|tx_tree| {
                if let Some((key, expected)) = batch.guard() {
                    let current = tx_tree.get(key)?;
                    if current.as_deref() != expected {
                        return Err(ConflictableTransactionError::Abort(()));
                    }
                }
                for (key, value) in batch.puts() {
                    tx_tree.insert(key.as_slice(), value.as_slice())?;
                }
                Ok(())
            });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(())) => Err(BlockchainError::StaleTip),
            Err(TransactionError::Storage(e)) => Err(BlockchainError::StorageUnavailable(
                format!("Failed to apply write batch: {e}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_batch_is_visible_after_apply() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(&dir.path().join("db")).unwrap();

        store
            .apply(WriteBatch::new().put(b"a", b"1").put(b"l", b"a"))
            .unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"l").unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.get(b"missing").unwrap(), None);
    }

    #[test]
    fn test_failed_guard_writes_nothing() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(&dir.path().join("db")).unwrap();
        store.apply(WriteBatch::new().put(b"l", b"tip-1")).unwrap();

        let stale = WriteBatch::new()
            .expect(b"l", Some(b"tip-0"))
            .put(b"block", b"bytes")
            .put(b"l", b"tip-2");
        assert_eq!(store.apply(stale), Err(BlockchainError::StaleTip));
        assert_eq!(store.get(b"block").unwrap(), None);
        assert_eq!(store.get(b"l").unwrap(), Some(b"tip-1".to_vec()));

        let fresh = WriteBatch::new()
            .expect(b"l", Some(b"tip-1"))
            .put(b"l", b"tip-2");
        store.apply(fresh).unwrap();
        assert_eq!(store.get(b"l").unwrap(), Some(b"tip-2".to_vec()));
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let store = SledStore::open(&path).unwrap();
            store
                .apply(WriteBatch::new().expect(b"l", None).put(b"l", b"tip"))
                .unwrap();
            store.flush().unwrap();
        }
        let reopened = SledStore::open(&path).unwrap();
        assert_eq!(reopened.get(b"l").unwrap(), Some(b"tip".to_vec()));
    }
}
