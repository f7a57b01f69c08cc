// Key-value persistence for the positive-filter store
//
// The filter store only needs ordered puts and prefix scans, so both
// backends expose exactly that. Keys are big-endian sequence numbers,
// which makes a prefix scan return filters in upload order.

use crate::{EncounterError, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub trait StorageBackend: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
    fn count_prefix(&self, prefix: &[u8]) -> Result<usize>;
    fn flush(&self) -> Result<()>;
}

/// Volatile storage; the default for a backend started without a data dir
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .data
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<usize> {
        Ok(self
            .data
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .count())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

fn storage_error(err: sled::Error) -> EncounterError {
    EncounterError::Storage(err.to_string())
}

/// On-disk storage backed by sled
pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(storage_error)?;
        Ok(Self { db })
    }
}

impl StorageBackend for SledStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.insert(key, value).map_err(storage_error)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut results = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (k, v) = item.map_err(storage_error)?;
            results.push((k.to_vec(), v.to_vec()));
        }
        Ok(results)
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<usize> {
        Ok(self.db.scan_prefix(prefix).count())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush().map_err(storage_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &dyn StorageBackend) {
        storage.put(b"cbf/\x00\x01", b"one").unwrap();
        storage.put(b"cbf/\x00\x02", b"two").unwrap();
        storage.put(b"meta/next", b"3").unwrap();

        assert_eq!(storage.count_prefix(b"meta/").unwrap(), 1);
        assert!(storage.scan_prefix(b"missing/").unwrap().is_empty());

        let scanned = storage.scan_prefix(b"cbf/").unwrap();
        let values: Vec<&[u8]> = scanned.iter().map(|(_, v)| v.as_slice()).collect();
        assert_eq!(values, vec![b"one".as_slice(), b"two".as_slice()]);
        assert_eq!(storage.count_prefix(b"cbf/").unwrap(), 2);
        storage.flush().unwrap();
    }

    #[test]
    fn test_memory_storage() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn test_sled_storage() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&SledStorage::open(dir.path()).unwrap());
    }

    #[test]
    fn test_sled_storage_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = SledStorage::open(dir.path()).unwrap();
            storage.put(b"k", b"v").unwrap();
            storage.flush().unwrap();
        }
        let reopened = SledStorage::open(dir.path()).unwrap();
        assert_eq!(
            reopened.scan_prefix(b"k").unwrap(),
            vec![(b"k".to_vec(), b"v".to_vec())]
        );
    }
}
