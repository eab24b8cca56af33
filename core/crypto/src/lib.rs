//! Cryptographic primitives for MediaVault.
//!
//! This module provides:
//! - Key derivation and password hashing using Argon2id
//! - Wrapping of the data key under a password-derived key
//! - Chunked authenticated encryption using XChaCha20-Poly1305
//! - The on-disk container format for encrypted media items
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time operations for sensitive comparisons
//! - Every decryption fails closed on an authentication mismatch

pub mod aead;
pub mod container;
pub mod credential;
pub mod kdf;
pub mod keys;
pub mod stream;
pub mod wrap;

pub use container::{
    decrypt_bytes, decrypt_from_container, encrypt_bytes, encrypt_to_container, ContainerHeader,
    ContainerReader, ContainerSummary, ContainerWriter, EncryptedChunk, VaultFileContainer,
    DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE,
};
pub use credential::PasswordCredential;
pub use kdf::{derive_key, KdfParams};
pub use keys::{Dek, Kek, Salt, KEY_LENGTH};
pub use stream::{ChunkCipher, ChunkHeader};
pub use wrap::{unwrap_key, wrap_key, WrappedKey};
