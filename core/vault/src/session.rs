//! Vault session management.
//!
//! [`SessionKeyManager`] owns the Locked/Unlocked state machine and is the
//! only holder of the plaintext data key. Transitions are serialized; readers
//! take cheap snapshots of the key through [`SessionKeyManager::active_key`].
//! The key is zeroized when the last snapshot is dropped after a lock.
//! Argon2 work runs on the blocking pool while the transition lock is held.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::operations::run_blocking;
use crate::record::CredentialRecord;
use mediavault_common::{Error, Result, SensitiveBytes};
use mediavault_crypto::{Dek, KdfParams};
use mediavault_storage::RecordStore;

/// Observable phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No key in memory.
    Locked,
    /// Data key available for operations.
    Unlocked,
}

enum SessionState {
    Locked,
    Unlocked { dek: Arc<Dek> },
}

/// Owner of the vault's key lifecycle.
///
/// Starts Locked. `setup` and `unlock` move to Unlocked, `lock` moves back.
/// `change_password` keeps the session Unlocked and the data key unchanged.
pub struct SessionKeyManager {
    store: Arc<dyn RecordStore>,
    kdf_params: KdfParams,
    state: RwLock<SessionState>,
    /// Serializes setup, unlock, lock and change_password.
    transition: Mutex<()>,
    epoch: Instant,
    last_activity_ms: AtomicU64,
}

impl SessionKeyManager {
    /// Create a locked manager over a record store.
    ///
    /// `kdf_params` is used when a new record is created by `setup`; existing
    /// records keep the parameters they were written with.
    pub fn new(store: Arc<dyn RecordStore>, kdf_params: KdfParams) -> Self {
        Self {
            store,
            kdf_params,
            state: RwLock::new(SessionState::Locked),
            transition: Mutex::new(()),
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    /// Initialize the vault with its first password.
    ///
    /// # Preconditions
    /// - No credential record exists
    ///
    /// # Postconditions
    /// - A fresh data key is generated and persisted in wrapped form
    /// - Session is Unlocked with that key
    ///
    /// # Errors
    /// - `AlreadyInitialized` if a record exists
    /// - Password empty
    /// - Storage failure; the session stays Locked
    pub async fn setup(&self, password: &[u8]) -> Result<()> {
        let _guard = self.transition.lock().await;

        if self.store.has_record().await? {
            return Err(Error::AlreadyInitialized);
        }

        let password = SensitiveBytes::new(password.to_vec());
        let params = self.kdf_params.clone();
        let (dek, record) = run_blocking(move || {
            let dek = Dek::generate();
            let record = CredentialRecord::create(password.as_bytes(), &dek, &params)?;
            Ok((dek, record))
        })
        .await?;
        self.store.store_record(record.to_bytes()?).await?;

        *self.state.write().await = SessionState::Unlocked { dek: Arc::new(dek) };
        self.touch();
        info!(store = self.store.name(), "Vault initialized");
        Ok(())
    }

    /// Unlock with a password.
    ///
    /// Unlocking an already unlocked session re-runs the full check and
    /// replaces the cached key.
    ///
    /// # Errors
    /// - `NotInitialized` if no record exists
    /// - `InvalidCredential` if the password does not verify; state unchanged
    /// - `CorruptVault` if the password verifies but the wrapped key does not
    ///   authenticate
    pub async fn unlock(&self, password: &[u8]) -> Result<()> {
        let _guard = self.transition.lock().await;

        let record = self.load_record().await?.ok_or(Error::NotInitialized)?;

        let password = SensitiveBytes::new(password.to_vec());
        let dek = run_blocking(move || {
            if !record.verify_password(password.as_bytes())? {
                warn!("Unlock rejected");
                return Err(Error::InvalidCredential);
            }

            record.unwrap_dek(password.as_bytes()).map_err(|e| match e {
                Error::Integrity(_) => {
                    Error::CorruptVault("Wrapped data key failed authentication".to_string())
                }
                other => other,
            })
        })
        .await?;

        *self.state.write().await = SessionState::Unlocked { dek: Arc::new(dek) };
        self.touch();
        info!("Vault unlocked");
        Ok(())
    }

    /// Lock the session, clearing the cached key.
    ///
    /// Idempotent. Operations already holding a key snapshot finish; new
    /// requests fail with `VaultLocked`.
    pub async fn lock(&self) {
        let _guard = self.transition.lock().await;
        self.clear_key().await;
    }

    /// Lock if no activity was recorded for at least `timeout`.
    ///
    /// # Returns
    /// - `true` if this call locked the session
    pub async fn lock_if_idle(&self, timeout: Duration) -> bool {
        let _guard = self.transition.lock().await;

        if matches!(*self.state.read().await, SessionState::Locked) {
            return false;
        }
        if self.idle_for() < timeout {
            return false;
        }

        debug!(timeout_secs = timeout.as_secs(), "Idle timeout reached");
        self.clear_key().await;
        true
    }

    /// Change the vault password, keeping the data key.
    ///
    /// # Preconditions
    /// - Session is Unlocked
    ///
    /// # Postconditions
    /// - The record is replaced in a single write with a fresh KDF salt
    /// - Existing containers stay readable without re-encryption
    ///
    /// # Errors
    /// - `VaultLocked` if the session is locked
    /// - `InvalidCredential` if `old_password` is wrong; nothing is written
    /// - `CorruptVault` if the stored key differs from the session key
    /// - Storage failure; the old record stays in effect
    pub async fn change_password(&self, old_password: &[u8], new_password: &[u8]) -> Result<()> {
        let _guard = self.transition.lock().await;

        let current = self.cached_key().await?;
        let record = self.load_record().await?.ok_or(Error::NotInitialized)?;

        let old_password = SensitiveBytes::new(old_password.to_vec());
        let new_password = SensitiveBytes::new(new_password.to_vec());
        let updated = run_blocking(move || {
            if !record.verify_password(old_password.as_bytes())? {
                warn!("Password change rejected");
                return Err(Error::InvalidCredential);
            }

            let stored = record.unwrap_dek(old_password.as_bytes()).map_err(|e| match e {
                Error::Integrity(_) => Error::InvalidCredential,
                other => other,
            })?;
            if !stored.ct_eq(&current) {
                return Err(Error::CorruptVault(
                    "Stored data key does not match the session key".to_string(),
                ));
            }

            record.rewrap(new_password.as_bytes(), &stored)
        })
        .await?;
        self.store.store_record(updated.to_bytes()?).await?;

        self.touch();
        info!("Password changed");
        Ok(())
    }

    /// Snapshot of the data key for one operation.
    ///
    /// Records activity for the idle timer.
    ///
    /// # Errors
    /// - `VaultLocked` if the session is locked
    pub async fn active_key(&self) -> Result<Arc<Dek>> {
        let key = self.cached_key().await?;
        self.touch();
        Ok(key)
    }

    /// Current phase.
    pub async fn phase(&self) -> Phase {
        match *self.state.read().await {
            SessionState::Locked => Phase::Locked,
            SessionState::Unlocked { .. } => Phase::Unlocked,
        }
    }

    /// Check if the session is unlocked.
    pub async fn is_unlocked(&self) -> bool {
        self.phase().await == Phase::Unlocked
    }

    /// Check whether a credential record exists.
    pub async fn is_initialized(&self) -> Result<bool> {
        self.store.has_record().await
    }

    /// Load and parse the credential record.
    pub async fn load_record(&self) -> Result<Option<CredentialRecord>> {
        match self.store.load_record().await? {
            Some(bytes) => Ok(Some(CredentialRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Record activity.
    pub fn touch(&self) {
        self.last_activity_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis(now.saturating_sub(last))
    }

    async fn cached_key(&self) -> Result<Arc<Dek>> {
        match &*self.state.read().await {
            SessionState::Unlocked { dek } => Ok(Arc::clone(dek)),
            SessionState::Locked => Err(Error::VaultLocked),
        }
    }

    async fn clear_key(&self) {
        let previous = std::mem::replace(&mut *self.state.write().await, SessionState::Locked);

        if let SessionState::Unlocked { dek } = previous {
            // zeroized here unless an operation still holds a snapshot
            if let Err(shared) = Arc::try_unwrap(dek) {
                debug!(
                    holders = Arc::strong_count(&shared) - 1,
                    "Key released after in-flight operations"
                );
            }
            info!("Vault locked");
        }
    }
}

impl Drop for SessionKeyManager {
    fn drop(&mut self) {
        *self.state.get_mut() = SessionState::Locked;
    }
}
