//! In-memory record store for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::provider::RecordStore;
use mediavault_common::{Error, Result};

/// In-memory record store.
///
/// Useful for testing and development. The record is lost on drop.
/// Clones share the same underlying record.
#[derive(Clone, Default)]
pub struct MemoryStore {
    record: Arc<RwLock<Option<Vec<u8>>>>,
    writes: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful record writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent writes fail, to exercise error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load_record(&self) -> Result<Option<Vec<u8>>> {
        let record = self
            .record
            .read()
            .map_err(|_| Error::Storage("Record lock poisoned".to_string()))?;
        Ok(record.clone())
    }

    async fn store_record(&self, record: Vec<u8>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("Simulated write failure".to_string()));
        }

        let mut slot = self
            .record
            .write()
            .map_err(|_| Error::Storage("Record lock poisoned".to_string()))?;
        *slot = Some(record);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_load() {
        let store = MemoryStore::new();
        assert!(store.load_record().await.unwrap().is_none());
        assert!(!store.has_record().await.unwrap());

        store.store_record(b"record".to_vec()).await.unwrap();
        assert_eq!(store.load_record().await.unwrap().unwrap(), b"record");
        assert!(store.has_record().await.unwrap());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_replace_is_whole() {
        let store = MemoryStore::new();
        store.store_record(b"first-record".to_vec()).await.unwrap();
        store.store_record(b"2nd".to_vec()).await.unwrap();

        assert_eq!(store.load_record().await.unwrap().unwrap(), b"2nd");
    }

    #[tokio::test]
    async fn test_failed_write_keeps_old_record() {
        let store = MemoryStore::new();
        store.store_record(b"old".to_vec()).await.unwrap();

        store.set_fail_writes(true);
        assert!(store.store_record(b"new".to_vec()).await.is_err());
        assert_eq!(store.load_record().await.unwrap().unwrap(), b"old");
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_record() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.store_record(b"shared".to_vec()).await.unwrap();

        assert_eq!(other.load_record().await.unwrap().unwrap(), b"shared");
    }
}
