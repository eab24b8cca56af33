//! Local filesystem store.
//!
//! Vault directory layout:
//! - `credential.json`: the credential record
//! - `settings.json`: vault settings (optional)
//! - `items/<uuid>.mvc`: one encrypted container per media item

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::provider::{ItemMetadata, RecordStore};
use mediavault_common::{Error, ItemId, Result};

/// Credential record file name in vault root.
pub const RECORD_FILENAME: &str = "credential.json";

/// Settings file name in vault root.
pub const SETTINGS_FILENAME: &str = "settings.json";

/// Item container directory name in vault root.
pub const ITEMS_DIRNAME: &str = "items";

/// File extension of item containers.
pub const ITEM_EXTENSION: &str = "mvc";

/// Local filesystem store.
///
/// Stores vault data in a local directory structure.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root and item directories are created if they don't exist
    ///
    /// # Errors
    /// - Invalid path
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // sync for constructor
        std::fs::create_dir_all(root.join(ITEMS_DIRNAME))?;

        Ok(Self { root })
    }

    /// Vault root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the credential record.
    pub fn record_path(&self) -> PathBuf {
        self.root.join(RECORD_FILENAME)
    }

    /// Path of the settings file.
    pub fn settings_path(&self) -> PathBuf {
        self.root.join(SETTINGS_FILENAME)
    }

    /// Directory holding item containers.
    pub fn items_dir(&self) -> PathBuf {
        self.root.join(ITEMS_DIRNAME)
    }

    /// Container path for an item.
    pub fn item_path(&self, id: &ItemId) -> PathBuf {
        self.items_dir().join(format!("{}.{}", id, ITEM_EXTENSION))
    }

    /// Check whether an item container exists.
    pub async fn item_exists(&self, id: &ItemId) -> Result<bool> {
        Ok(fs::try_exists(self.item_path(id)).await?)
    }

    /// Delete an item container.
    ///
    /// # Errors
    /// - `NotFound` if the item does not exist
    pub async fn remove_item(&self, id: &ItemId) -> Result<()> {
        match fs::remove_file(self.item_path(id)).await {
            Ok(()) => {
                debug!(item = %id, "Item removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Item not found: {}", id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// List all item containers, sorted by modification time.
    ///
    /// Files in the items directory that are not named like containers are
    /// ignored; they are usually leftovers of interrupted imports.
    pub async fn list_items(&self) -> Result<Vec<ItemMetadata>> {
        let mut entries = fs::read_dir(self.items_dir()).await?;
        let mut items = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ITEM_EXTENSION) {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| ItemId::parse(s).ok())
            else {
                continue;
            };

            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = meta
                .modified()
                .map(|t| t.into())
                .unwrap_or_else(|_| Utc::now());

            items.push(ItemMetadata {
                id,
                size: meta.len(),
                modified,
            });
        }

        items.sort_by_key(|item| item.modified);
        Ok(items)
    }

    /// Read a small JSON side file such as settings.
    pub async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace `path` with `data`.
    ///
    /// Each call stages into its own uniquely named sibling file, syncs it,
    /// renames it over the target and syncs the directory. Concurrent writers
    /// never share a staging file, so the last rename wins with a whole file.
    pub async fn write_file_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::InvalidInput(format!("Invalid path: {}", path.display())))?;
        let target = path.to_path_buf();
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut staged = tempfile::Builder::new()
                .prefix(".")
                .suffix(".tmp")
                .tempfile_in(&dir)?;
            staged.write_all(&data)?;
            staged.as_file().sync_all()?;
            // dropping a failed persist removes the staging file
            staged.persist(&target).map_err(|e| Error::Io(e.error))?;
            sync_dir(&dir)
        })
        .await
        .map_err(|e| Error::Storage(format!("Write task failed: {}", e)))?
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    std::fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl RecordStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn load_record(&self) -> Result<Option<Vec<u8>>> {
        self.read_file(&self.record_path()).await
    }

    async fn store_record(&self, record: Vec<u8>) -> Result<()> {
        self.write_file_atomic(&self.record_path(), &record).await?;
        debug!(path = %self.record_path().display(), "Credential record written");
        Ok(())
    }
}
