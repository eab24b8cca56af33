//! Vault manager for creating and opening local vaults.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::VaultSettings;
use crate::operations::VaultOperations;
use crate::record::CredentialRecord;
use crate::session::SessionKeyManager;
use mediavault_common::{Error, ItemId, Result};
use mediavault_crypto::{ContainerSummary, VaultFileContainer};
use mediavault_storage::{ItemMetadata, LocalStore, RecordStore};

/// A vault rooted in a local directory.
///
/// Ties together the credential record, settings, item containers and the
/// session that guards the data key.
pub struct VaultManager {
    store: Arc<LocalStore>,
    session: Arc<SessionKeyManager>,
    settings: VaultSettings,
}

impl VaultManager {
    /// Open the vault at `root`, creating the directory layout if missing.
    ///
    /// The session starts Locked. A vault without a credential record can be
    /// initialized later with [`SessionKeyManager::setup`].
    ///
    /// # Errors
    /// - Invalid or unreadable settings
    /// - Storage access failure
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let store = Arc::new(LocalStore::new(root)?);
        let settings = match store.read_file(&store.settings_path()).await? {
            Some(bytes) => VaultSettings::from_json(&bytes)?,
            None => VaultSettings::default(),
        };

        debug!(root = %store.root().display(), "Vault opened");
        Ok(Self::with_settings(store, settings))
    }

    /// Create a new vault at `root`.
    ///
    /// # Postconditions
    /// - Settings and credential record are persisted
    /// - Returns a manager with an Unlocked session
    ///
    /// # Errors
    /// - `AlreadyInitialized` if `root` already holds a vault
    /// - Invalid settings, empty password, storage failure
    pub async fn create(
        root: impl AsRef<Path>,
        password: &[u8],
        settings: VaultSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let store = Arc::new(LocalStore::new(root)?);
        if store.has_record().await? {
            return Err(Error::AlreadyInitialized);
        }

        store
            .write_file_atomic(&store.settings_path(), settings.to_json()?.as_bytes())
            .await?;

        let manager = Self::with_settings(store, settings);
        manager.session.setup(password).await?;

        info!(root = %manager.root().display(), "Vault created");
        Ok(manager)
    }

    fn with_settings(store: Arc<LocalStore>, settings: VaultSettings) -> Self {
        let record_store: Arc<dyn RecordStore> = store.clone();
        let session = Arc::new(SessionKeyManager::new(record_store, settings.kdf.clone()));
        Self {
            store,
            session,
            settings,
        }
    }

    /// Vault root directory.
    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Current settings.
    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    /// Replace and persist settings.
    ///
    /// Applies to containers created from now on. Existing records keep their
    /// KDF parameters until the next password change.
    pub async fn update_settings(&mut self, settings: VaultSettings) -> Result<()> {
        settings.validate()?;
        self.store
            .write_file_atomic(&self.store.settings_path(), settings.to_json()?.as_bytes())
            .await?;
        self.settings = settings;
        Ok(())
    }

    /// Session guarding the data key.
    pub fn session(&self) -> &Arc<SessionKeyManager> {
        &self.session
    }

    /// Lock the session if it has been idle past the configured timeout.
    ///
    /// Meant to be called periodically by the application. Does nothing when
    /// `idle_timeout_secs` is zero.
    ///
    /// # Returns
    /// - `true` if this call locked the session
    pub async fn lock_if_idle(&self) -> bool {
        match self.settings.idle_timeout() {
            Some(timeout) => self.session.lock_if_idle(timeout).await,
            None => false,
        }
    }

    /// Operations handler using the configured chunk size.
    pub fn operations(&self) -> Result<VaultOperations> {
        VaultOperations::new(Arc::clone(&self.session), self.settings.chunk_size)
    }

    /// Load the credential record.
    ///
    /// # Errors
    /// - `NotInitialized` if the vault has no record
    pub async fn record(&self) -> Result<CredentialRecord> {
        self.session.load_record().await?.ok_or(Error::NotInitialized)
    }

    /// Encrypt a file into a new item.
    ///
    /// # Errors
    /// - `VaultLocked` if the session is locked
    /// - I/O failure reading `source`
    pub async fn import(&self, source: &Path) -> Result<(ItemId, ContainerSummary)> {
        let id = ItemId::generate();
        let summary = self
            .operations()?
            .import_file(source, &self.store.item_path(&id))
            .await?;

        info!(item = %id, "Item imported");
        Ok((id, summary))
    }

    /// Decrypt an item to `dest`.
    ///
    /// # Errors
    /// - `NotFound` if the item does not exist
    /// - `VaultLocked` if the session is locked
    /// - `Integrity` if the container fails authentication; `dest` is not
    ///   created
    pub async fn export(&self, id: &ItemId, dest: &Path) -> Result<u64> {
        let path = self.existing_item(id).await?;
        self.operations()?.export_file(&path, dest).await
    }

    /// Fully authenticate an item.
    ///
    /// # Returns
    /// - Plaintext length on success
    pub async fn verify_item(&self, id: &ItemId) -> Result<u64> {
        let path = self.existing_item(id).await?;
        self.operations()?.verify_file(&path).await
    }

    /// Parse an item container without decrypting it.
    ///
    /// Works while Locked; no tag is checked.
    pub async fn inspect_item(&self, id: &ItemId) -> Result<VaultFileContainer> {
        let path = self.existing_item(id).await?;
        let bytes = tokio::fs::read(&path).await?;
        VaultFileContainer::from_bytes(&bytes)
    }

    /// List items, oldest first.
    pub async fn list_items(&self) -> Result<Vec<ItemMetadata>> {
        self.store.list_items().await
    }

    /// Delete an item container.
    pub async fn remove_item(&self, id: &ItemId) -> Result<()> {
        self.store.remove_item(id).await?;
        info!(item = %id, "Item removed");
        Ok(())
    }

    async fn existing_item(&self, id: &ItemId) -> Result<std::path::PathBuf> {
        if !self.store.item_exists(id).await? {
            return Err(Error::NotFound(format!("Item not found: {}", id)));
        }
        Ok(self.store.item_path(id))
    }
}
