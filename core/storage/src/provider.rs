//! Record store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mediavault_common::{ItemId, Result};

/// Metadata for a stored item container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Item identifier.
    pub id: ItemId,
    /// Container size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// Storage for the vault's single credential record.
///
/// Implementations must make [`RecordStore::store_record`] atomic: after it
/// returns, readers see the new record; if it fails, readers keep seeing the
/// old one.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get the store name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Load the credential record.
    ///
    /// # Returns
    /// - `Ok(None)` if the vault has not been set up
    ///
    /// # Errors
    /// - I/O errors
    async fn load_record(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the credential record.
    ///
    /// # Postconditions
    /// - The whole record is replaced, never a part of it
    ///
    /// # Errors
    /// - I/O errors; the previous record is left intact
    async fn store_record(&self, record: Vec<u8>) -> Result<()>;

    /// Check whether a record exists.
    async fn has_record(&self) -> Result<bool> {
        Ok(self.load_record().await?.is_some())
    }
}
