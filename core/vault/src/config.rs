//! Vault settings.
//!
//! Settings are plain configuration; they carry no secrets and may be edited
//! by hand. A missing settings file means defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use mediavault_common::{Error, Result};
use mediavault_crypto::{KdfParams, DEFAULT_CHUNK_SIZE};

/// Largest accepted container chunk size, shared with the container codec.
pub use mediavault_crypto::MAX_CHUNK_SIZE;

/// Smallest accepted container chunk size.
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;

/// Default idle timeout before the session auto-locks.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Tunable vault settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    /// KDF parameters for newly created credential records.
    pub kdf: KdfParams,
    /// Plaintext chunk size for new containers.
    pub chunk_size: usize,
    /// Idle time after which the session locks. Zero disables auto-lock.
    ///
    /// Nothing locks on its own: the embedding application drives a timer
    /// and calls [`crate::VaultManager::lock_if_idle`].
    pub idle_timeout_secs: u64,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }
}

impl VaultSettings {
    /// Check the settings are usable.
    ///
    /// # Errors
    /// - `InvalidInput` if the chunk size is out of range or the KDF
    ///   parameters are zero
    pub fn validate(&self) -> Result<()> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(Error::InvalidInput(format!(
                "Chunk size {} outside {}..={}",
                self.chunk_size, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
            )));
        }
        if self.kdf.memory_cost == 0 || self.kdf.time_cost == 0 || self.kdf.parallelism == 0 {
            return Err(Error::InvalidInput("KDF parameters must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Idle timeout, if auto-lock is enabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Serialize settings to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse and validate settings from JSON.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let settings: Self =
            serde_json::from_slice(json).map_err(|e| Error::Serialization(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_valid() {
        let settings = VaultSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.kdf, KdfParams::moderate());
        assert_eq!(settings.idle_timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_settings_roundtrip() {
        let settings = VaultSettings {
            kdf: KdfParams::interactive(),
            chunk_size: 64 * 1024,
            idle_timeout_secs: 0,
        };

        let json = settings.to_json().unwrap();
        let restored = VaultSettings::from_json(json.as_bytes()).unwrap();
        assert_eq!(restored, settings);
        assert_eq!(restored.idle_timeout(), None);
    }

    #[test]
    fn test_partial_settings_use_defaults() {
        let restored = VaultSettings::from_json(br#"{"chunk_size": 8192}"#).unwrap();
        assert_eq!(restored.chunk_size, 8192);
        assert_eq!(restored.idle_timeout_secs, DEFAULT_IDLE_TIMEOUT_SECS);
    }

    #[test]
    fn test_invalid_chunk_size_rejected() {
        for size in [0, 1024, MAX_CHUNK_SIZE + 1] {
            let json = format!(r#"{{"chunk_size": {}}}"#, size);
            assert!(matches!(
                VaultSettings::from_json(json.as_bytes()),
                Err(Error::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_chunk_limit_matches_codec() {
        let settings = VaultSettings {
            chunk_size: MAX_CHUNK_SIZE,
            ..VaultSettings::default()
        };
        settings.validate().unwrap();
        assert!(mediavault_crypto::ContainerHeader::generate(settings.chunk_size).is_ok());
    }

    #[test]
    fn test_malformed_settings_rejected() {
        assert!(matches!(
            VaultSettings::from_json(b"not json"),
            Err(Error::Serialization(_))
        ));
    }
}
