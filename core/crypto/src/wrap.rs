//! Envelope encryption of the data key.
//!
//! The [`Dek`] is stored only in wrapped form: encrypted and authenticated
//! under the password-derived [`Kek`] with a fresh random nonce per wrap.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::aead::{cipher, decrypt_detached, encrypt_detached, generate_nonce, NONCE_SIZE, TAG_SIZE};
use crate::keys::{Dek, Kek, KEY_LENGTH};
use mediavault_common::encoding::base64_array;
use mediavault_common::Result;

/// Associated data binding a wrap to its purpose and format revision.
const WRAP_AAD: &[u8] = b"mediavault/dek-wrap/v1";

/// A data key encrypted under a key-encryption key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    /// Encrypted key bytes.
    #[serde(with = "base64_array")]
    pub ciphertext: [u8; KEY_LENGTH],
    /// Nonce used for this wrap.
    #[serde(with = "base64_array")]
    pub nonce: [u8; NONCE_SIZE],
    /// Poly1305 authentication tag.
    #[serde(with = "base64_array")]
    pub tag: [u8; TAG_SIZE],
}

/// Wrap `dek` under `kek`.
///
/// # Postconditions
/// - A new random nonce is used on every call, so wrapping the same key
///   twice yields different ciphertexts
///
/// # Errors
/// - Returns error if encryption fails
pub fn wrap_key(dek: &Dek, kek: &Kek) -> Result<WrappedKey> {
    let nonce = generate_nonce();
    let mut buffer = *dek.as_bytes();

    let result = encrypt_detached(&cipher(kek.as_bytes()), &nonce, WRAP_AAD, &mut buffer);
    let wrapped = result.map(|tag| WrappedKey {
        ciphertext: buffer,
        nonce,
        tag,
    });
    buffer.zeroize();
    wrapped
}

/// Unwrap a data key.
///
/// # Errors
/// - `Integrity` if the tag does not verify (wrong password or corrupted
///   record); no key bytes are returned in that case
pub fn unwrap_key(wrapped: &WrappedKey, kek: &Kek) -> Result<Dek> {
    let mut buffer = wrapped.ciphertext;

    let result = decrypt_detached(
        &cipher(kek.as_bytes()),
        &wrapped.nonce,
        WRAP_AAD,
        &mut buffer,
        &wrapped.tag,
    );
    let dek = result.map(|()| Dek::from_bytes(buffer));
    buffer.zeroize();
    dek
}
