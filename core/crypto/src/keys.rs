//! Key types with secure memory handling.
//!
//! Every key type wipes its bytes on drop. Key types are not `Clone`; share
//! them by reference or `Arc` so exactly one buffer holds the bytes.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use mediavault_common::encoding::base64_array;

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of KDF and password-hash salts in bytes.
pub const SALT_LENGTH: usize = 32;

/// Key-encryption key derived from the user password.
///
/// Only ever used to wrap or unwrap the [`Dek`].
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Kek {
    key: [u8; KEY_LENGTH],
}

impl Kek {
    /// Create a key-encryption key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Raw key bytes for the wrapping cipher.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for Kek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kek([REDACTED])")
    }
}

/// Data-encryption key that protects media bytes.
///
/// Generated once per vault from the OS random source and never derived from
/// the password, which is what lets a password change re-wrap it instead of
/// re-encrypting every item.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Dek {
    key: [u8; KEY_LENGTH],
}

impl Dek {
    /// Create a data key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Generate a random data key.
    ///
    /// Filled in place so no unwiped copy of the key is left on the stack.
    pub fn generate() -> Self {
        let mut dek = Self {
            key: [0u8; KEY_LENGTH],
        };
        rand::thread_rng().fill_bytes(&mut dek.key);
        dek
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Compare two data keys in constant time.
    pub fn ct_eq(&self, other: &Dek) -> bool {
        self.key[..].ct_eq(&other.key[..]).into()
    }

    /// Derive the key that authenticates a whole container.
    ///
    /// Bound to the container's base nonce, so every file gets its own MAC key.
    pub fn derive_mac_key(&self, base_nonce: &[u8]) -> MacKey {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(&self.key);
        hasher.update(base_nonce);
        hasher.update(b"filemac");

        let result = hasher.finalize();
        let mut derived = [0u8; KEY_LENGTH];
        derived.copy_from_slice(&result);
        MacKey { key: derived }
    }
}

impl fmt::Debug for Dek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dek([REDACTED])")
    }
}

/// Key for the container-level MAC.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MacKey {
    key: [u8; KEY_LENGTH],
}

impl MacKey {
    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for MacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacKey([REDACTED])")
    }
}

/// Salt for key derivation and password hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(#[serde(with = "base64_array")] pub [u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dek_generate() {
        let key1 = Dek::generate();
        let key2 = Dek::generate();

        // Random keys should be different
        assert_ne!(key1.as_bytes(), key2.as_bytes());
        assert!(!key1.ct_eq(&key2));
        assert_ne!(key1.as_bytes(), &[0u8; KEY_LENGTH]);
    }

    #[test]
    fn test_dek_ct_eq() {
        let a = Dek::from_bytes([7u8; KEY_LENGTH]);
        let b = Dek::from_bytes([7u8; KEY_LENGTH]);
        assert!(a.ct_eq(&b));
    }

    #[test]
    fn test_mac_key_bound_to_nonce() {
        let dek = Dek::from_bytes([1u8; KEY_LENGTH]);

        let k1 = dek.derive_mac_key(&[0u8; 24]);
        let k2 = dek.derive_mac_key(&[0u8; 24]);
        let k3 = dek.derive_mac_key(&[1u8; 24]);

        assert_eq!(k1.as_bytes(), k2.as_bytes());
        assert_ne!(k1.as_bytes(), k3.as_bytes());
        assert_ne!(k1.as_bytes(), dek.as_bytes());
    }

    #[test]
    fn test_debug_is_redacted() {
        let dek = Dek::from_bytes([0xAA; KEY_LENGTH]);
        let kek = Kek::from_bytes([0xBB; KEY_LENGTH]);
        assert_eq!(format!("{:?}", dek), "Dek([REDACTED])");
        assert_eq!(format!("{:?}", kek), "Kek([REDACTED])");
    }

    #[test]
    fn test_salt_generate() {
        let salt1 = Salt::generate();
        let salt2 = Salt::generate();

        // Random salts should be different
        assert_ne!(salt1.as_bytes(), salt2.as_bytes());
    }

    #[test]
    fn test_salt_serde_roundtrip() {
        let salt = Salt::from_bytes([9u8; SALT_LENGTH]);
        let json = serde_json::to_string(&salt).unwrap();
        assert!(json.starts_with('"'));
        let back: Salt = serde_json::from_str(&json).unwrap();
        assert_eq!(back, salt);
    }
}
