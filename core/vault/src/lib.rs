//! Vault engine for MediaVault.
//!
//! This module provides:
//! - The persisted credential record and its format versioning
//! - The session key manager state machine (Locked/Unlocked)
//! - Streaming import, export and verification of media files
//! - Local vault management and settings
//!
//! # Architecture
//! The vault module sits between the user interface and storage, handling
//! key lifecycle and all encryption/decryption transparently.

pub mod config;
pub mod manager;
pub mod operations;
pub mod policy;
pub mod record;
pub mod session;

pub use config::VaultSettings;
pub use manager::VaultManager;
pub use operations::VaultOperations;
pub use policy::validate_new_password;
pub use record::{CredentialRecord, FormatVersion};
pub use session::{Phase, SessionKeyManager};
