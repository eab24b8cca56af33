//! Common error types for MediaVault.

use thiserror::Error;

/// Top-level error type for MediaVault operations.
///
/// Variants never carry key material or passwords.
#[derive(Debug, Error)]
pub enum Error {
    /// Wrong password on verify, unlock or password change.
    #[error("Invalid credential")]
    InvalidCredential,

    /// Authentication tag mismatch on a wrapped key, chunk or container.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// The persisted credential record cannot produce the data key.
    #[error("Vault is corrupt: {0}")]
    CorruptVault(String),

    /// A key was requested while the session is locked.
    #[error("Vault is locked")]
    VaultLocked,

    /// Setup was attempted on a vault that already has a credential record.
    #[error("Vault is already initialized")]
    AlreadyInitialized,

    /// An operation needs a credential record but none exists yet.
    #[error("Vault is not initialized")]
    NotInitialized,

    /// Record or container written by an unknown format version.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// True for failures caused by tampered or corrupted ciphertext.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Error::Integrity(_) | Error::CorruptVault(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
