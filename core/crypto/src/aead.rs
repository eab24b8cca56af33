//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation. Everything here
//! works in place with a detached tag, because both the key wrapper and the
//! chunk format store the tag as a separate field.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, AeadCore, AeadInPlace, KeyInit, OsRng},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use mediavault_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Build a cipher instance for `key`.
pub fn cipher(key: &[u8; KEY_LENGTH]) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(GenericArray::from_slice(key))
}

/// Generate a random nonce from the OS random source.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let mut out = [0u8; NONCE_SIZE];
    out.copy_from_slice(&nonce);
    out
}

/// Encrypt `buffer` in place and return the detached tag.
///
/// # Preconditions
/// - `nonce` must never be reused with the same key
///
/// # Postconditions
/// - `buffer` holds ciphertext of the same length
///
/// # Errors
/// - Returns error if the buffer is too large for the cipher
pub fn encrypt_detached(
    cipher: &XChaCha20Poly1305,
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    buffer: &mut [u8],
) -> Result<[u8; TAG_SIZE]> {
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, buffer)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut out = [0u8; TAG_SIZE];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Verify `tag` and decrypt `buffer` in place.
///
/// # Postconditions
/// - On success `buffer` holds the plaintext
///
/// # Errors
/// - `Integrity` if the tag does not match (wrong key, tampered data,
///   wrong associated data)
///
/// # Security
/// - Authenticates before decrypting; callers must discard `buffer` on error
pub fn decrypt_detached(
    cipher: &XChaCha20Poly1305,
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    buffer: &mut [u8],
    tag: &[u8; TAG_SIZE],
) -> Result<()> {
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            aad,
            buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| Error::Integrity("Authentication tag mismatch".to_string()))
}
