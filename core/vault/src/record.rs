//! Persisted credential record.
//!
//! The record is the only persistent key-related state of a vault. It holds
//! the authentication hash and the wrapped data key side by side, and is
//! always written as a whole.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mediavault_common::{Error, Result};
use mediavault_crypto::{derive_key, unwrap_key, wrap_key, Dek, KdfParams, PasswordCredential, Salt, WrappedKey};

/// Record format version for migration support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatVersion {
    /// Bumped on incompatible changes.
    pub major: u32,
    /// Bumped on additive changes.
    pub minor: u32,
}

impl FormatVersion {
    /// Current record format version.
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    /// Check if this version is compatible with the current version.
    pub fn is_compatible(&self) -> bool {
        self.major == Self::CURRENT.major
    }
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Credential record of a vault.
///
/// Every field is mandatory: a vault either has a complete record or none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Record format version.
    pub version: FormatVersion,
    /// Password authentication hash.
    pub credential: PasswordCredential,
    /// Salt for deriving the key-encryption key.
    pub kdf_salt: Salt,
    /// KDF parameters used with `kdf_salt`.
    pub kdf_params: KdfParams,
    /// Data key wrapped under the key-encryption key.
    pub wrapped_dek: WrappedKey,
    /// Vault creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last password change.
    pub modified_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: FormatVersion,
}

impl CredentialRecord {
    /// Build the record for a new vault.
    ///
    /// # Preconditions
    /// - `password` must not be empty
    ///
    /// # Postconditions
    /// - Authentication hash and KEK use independent random salts
    /// - `dek` is stored only in wrapped form
    ///
    /// # Errors
    /// - Password empty
    /// - KDF failure
    pub fn create(password: &[u8], dek: &Dek, params: &KdfParams) -> Result<Self> {
        let credential = PasswordCredential::create(password, params)?;
        let kdf_salt = Salt::generate();
        let kek = derive_key(password, &kdf_salt, params)?;
        let wrapped_dek = wrap_key(dek, &kek)?;
        let now = Utc::now();

        Ok(Self {
            version: FormatVersion::CURRENT,
            credential,
            kdf_salt,
            kdf_params: params.clone(),
            wrapped_dek,
            created_at: now,
            modified_at: now,
        })
    }

    /// Verify a password against the authentication hash.
    ///
    /// # Returns
    /// - `Ok(true)` if password is correct
    /// - `Ok(false)` if password is incorrect
    /// - `Err(_)` if verification failed for other reasons
    pub fn verify_password(&self, password: &[u8]) -> Result<bool> {
        self.credential.verify(password)
    }

    /// Derive the KEK from `password` and unwrap the data key.
    ///
    /// # Errors
    /// - `Integrity` if the wrapped key does not authenticate under the
    ///   derived KEK
    pub fn unwrap_dek(&self, password: &[u8]) -> Result<Dek> {
        let kek = derive_key(password, &self.kdf_salt, &self.kdf_params)?;
        unwrap_key(&self.wrapped_dek, &kek)
    }

    /// Produce the record for `new_password`, wrapping the same `dek`.
    ///
    /// The caller must already have verified the old password; this only
    /// builds the replacement. Both salts are regenerated and the work factor
    /// carries over.
    ///
    /// # Errors
    /// - New password empty
    pub fn rewrap(&self, new_password: &[u8], dek: &Dek) -> Result<Self> {
        let credential = PasswordCredential::create(new_password, &self.credential.params)?;
        let kdf_salt = Salt::generate();
        let kek = derive_key(new_password, &kdf_salt, &self.kdf_params)?;
        let wrapped_dek = wrap_key(dek, &kek)?;

        Ok(Self {
            version: FormatVersion::CURRENT,
            credential,
            kdf_salt,
            kdf_params: self.kdf_params.clone(),
            wrapped_dek,
            created_at: self.created_at,
            modified_at: Utc::now(),
        })
    }

    /// Serialize record to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Serialize to bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes.
    ///
    /// # Errors
    /// - `UnsupportedFormat` if the record was written by an incompatible
    ///   format version
    /// - `Serialization` for malformed records
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let probe: VersionProbe =
            serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
        if !probe.version.is_compatible() {
            return Err(Error::UnsupportedFormat(format!(
                "Credential record version {}.{}",
                probe.version.major, probe.version.minor
            )));
        }

        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> KdfParams {
        KdfParams::minimal()
    }

    #[test]
    fn test_format_version_compatibility() {
        let current = FormatVersion::CURRENT;
        assert!(current.is_compatible());

        let incompatible = FormatVersion { major: 2, minor: 0 };
        assert!(!incompatible.is_compatible());
    }

    #[test]
    fn test_record_creation_and_unwrap() {
        let dek = Dek::generate();
        let record = CredentialRecord::create(b"secure-password", &dek, &params()).unwrap();

        assert!(record.verify_password(b"secure-password").unwrap());
        assert!(!record.verify_password(b"wrong-password").unwrap());
        assert!(record.unwrap_dek(b"secure-password").unwrap().ct_eq(&dek));
        assert_ne!(record.credential.salt, record.kdf_salt);
    }

    #[test]
    fn test_unwrap_with_wrong_password_is_integrity_error() {
        let record = CredentialRecord::create(b"right", &Dek::generate(), &params()).unwrap();
        assert!(matches!(record.unwrap_dek(b"wrong"), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_rewrap_keeps_dek() {
        let dek = Dek::generate();
        let record = CredentialRecord::create(b"old-password", &dek, &params()).unwrap();

        let updated = record.rewrap(b"new-password", &dek).unwrap();

        assert!(updated.verify_password(b"new-password").unwrap());
        assert!(!updated.verify_password(b"old-password").unwrap());
        assert!(updated.unwrap_dek(b"new-password").unwrap().ct_eq(&dek));
        assert!(updated.unwrap_dek(b"old-password").is_err());
        assert_ne!(updated.kdf_salt, record.kdf_salt);
        assert_eq!(updated.created_at, record.created_at);
    }

    #[test]
    fn test_rewrap_rejects_empty_password() {
        let dek = Dek::generate();
        let record = CredentialRecord::create(b"old-password", &dek, &params()).unwrap();

        assert!(matches!(record.rewrap(b"", &dek), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_record_serialization() {
        let record = CredentialRecord::create(b"test", &Dek::generate(), &params()).unwrap();

        let bytes = record.to_bytes().unwrap();
        let restored = CredentialRecord::from_bytes(&bytes).unwrap();
        assert_eq!(restored, record);

        let json = record.to_json().unwrap();
        assert!(json.contains("wrapped_dek"));
        assert!(json.contains("kdf_params"));
    }

    #[test]
    fn test_incompatible_version_rejected() {
        let mut record = CredentialRecord::create(b"test", &Dek::generate(), &params()).unwrap();
        record.version = FormatVersion { major: 2, minor: 0 };
        let bytes = record.to_bytes().unwrap();

        assert!(matches!(
            CredentialRecord::from_bytes(&bytes),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_partial_record_rejected() {
        let record = CredentialRecord::create(b"test", &Dek::generate(), &params()).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&record.to_bytes().unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("wrapped_dek");
        let bytes = serde_json::to_vec(&value).unwrap();

        assert!(matches!(
            CredentialRecord::from_bytes(&bytes),
            Err(Error::Serialization(_))
        ));
    }
}
