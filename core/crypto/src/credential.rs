//! Password authentication hash.
//!
//! The credential proves knowledge of the password and nothing else. It is
//! computed with its own random salt, so its output is unrelated to the
//! key-encryption key derived by [`crate::kdf::derive_key`] even though both
//! use Argon2id.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::kdf::{argon2id, KdfParams};
use crate::keys::{Salt, KEY_LENGTH};
use mediavault_common::encoding::base64_array;
use mediavault_common::{Error, Result};

/// Salted, cost-tagged Argon2id hash of the vault password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordCredential {
    /// Salt used only for the authentication hash.
    pub salt: Salt,
    /// Argon2id output.
    #[serde(with = "base64_array")]
    pub hash: [u8; KEY_LENGTH],
    /// Work factor the hash was computed with.
    pub params: KdfParams,
}

impl PasswordCredential {
    /// Hash a new password with a fresh random salt.
    ///
    /// # Errors
    /// - Returns error if password is empty
    /// - Returns error if `params` are not valid Argon2id parameters
    pub fn create(password: &[u8], params: &KdfParams) -> Result<Self> {
        if password.is_empty() {
            return Err(Error::InvalidInput("Password cannot be empty".to_string()));
        }

        let salt = Salt::generate();
        let mut hash = [0u8; KEY_LENGTH];
        argon2id(password, &salt, params, &mut hash)?;

        Ok(Self {
            salt,
            hash,
            params: params.clone(),
        })
    }

    /// Check a password against this credential.
    ///
    /// Recomputes the hash with the stored salt and work factor and compares
    /// in constant time.
    ///
    /// # Returns
    /// - `Ok(true)` if password is correct
    /// - `Ok(false)` if password is incorrect or empty
    /// - `Err(_)` only if the stored parameters are unusable
    pub fn verify(&self, password: &[u8]) -> Result<bool> {
        if password.is_empty() {
            return Ok(false);
        }

        let mut candidate = [0u8; KEY_LENGTH];
        argon2id(password, &self.salt, &self.params, &mut candidate)?;
        let equal: bool = candidate[..].ct_eq(&self.hash[..]).into();
        candidate.zeroize();

        Ok(equal)
    }

    /// Produce the credential for `new_password` after checking `old_password`.
    ///
    /// The work factor carries over. The wrapped data key is not touched here;
    /// re-wrapping it is the session manager's job.
    ///
    /// # Errors
    /// - `InvalidCredential` if `old_password` does not verify
    /// - Returns error if `new_password` is empty
    pub fn change_password(&self, old_password: &[u8], new_password: &[u8]) -> Result<Self> {
        if !self.verify(old_password)? {
            return Err(Error::InvalidCredential);
        }
        Self::create(new_password, &self.params)
    }
}
