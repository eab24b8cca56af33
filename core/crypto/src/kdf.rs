//! Password stretching with Argon2id (v0x13, 32-byte output).
//!
//! One construction backs both the password-derived [`Kek`] and the
//! authentication hash in [`crate::credential`]; the two always use
//! independent salts, so neither output reveals the other.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::keys::{Kek, Salt, KEY_LENGTH};
use mediavault_common::{Error, Result};

/// Argon2id work factor.
///
/// Persisted with the credential record so that a later change of defaults
/// never invalidates an existing vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory in KiB.
    pub memory_cost: u32,
    /// Passes over memory.
    pub time_cost: u32,
    /// Lanes.
    pub parallelism: u32,
}

impl KdfParams {
    /// 64 MiB, 3 passes, 4 lanes. Roughly a second on a desktop.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 64 * 1024,
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// 256 MiB, 4 passes, 4 lanes. Several seconds; for long-lived vaults.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 256 * 1024,
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// 32 MiB, 3 passes, 2 lanes. Default; fits phones.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32 * 1024,
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// 1 MiB, 1 pass, 1 lane. Tests only.
    pub fn minimal() -> Self {
        Self {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    /// Look up a preset by name.
    ///
    /// # Errors
    /// - Returns error for an unknown preset name
    pub fn from_preset(name: &str) -> Result<Self> {
        match name {
            "interactive" => Ok(Self::interactive()),
            "moderate" => Ok(Self::moderate()),
            "sensitive" => Ok(Self::sensitive()),
            other => Err(Error::InvalidInput(format!(
                "Unknown KDF strength '{}'. Use: interactive, moderate, or sensitive",
                other
            ))),
        }
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::moderate()
    }
}

/// Run Argon2id over `password` and `salt` into a 32-byte output.
pub(crate) fn argon2id(
    password: &[u8],
    salt: &Salt,
    params: &KdfParams,
    out: &mut [u8; KEY_LENGTH],
) -> Result<()> {
    params
        .argon2()?
        .hash_password_into(password, salt.as_bytes(), out)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))
}

/// Stretch `password` into the key-encryption key for `salt`.
///
/// Same inputs always give the same key; that is what lets unlock recover
/// the key that wrapped the data key.
///
/// # Errors
/// - `InvalidInput` for an empty password
/// - `Crypto` if `params` are rejected by Argon2
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<Kek> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2id(password, salt, params, &mut key_bytes)?;

    // Kek::from_bytes copies; scrub the stack copy
    let kek = Kek::from_bytes(key_bytes);
    zeroize::Zeroize::zeroize(&mut key_bytes);
    Ok(kek)
}
