//! Chunked encryption for large files.
//!
//! A file is processed as an ordered sequence of fixed-size chunks so that
//! videos of any size can be encrypted or decrypted without loading the whole
//! file into memory. Each chunk is independently authenticated.
//!
//! # Nonces
//! Chunk `i` uses the file's random base nonce with its trailing 8 bytes
//! XORed with `i` (little endian). Indices are unique within a file, so
//! nonces are too; base nonces are random per file.

use chacha20poly1305::XChaCha20Poly1305;

use crate::aead::{cipher, decrypt_detached, encrypt_detached, NONCE_SIZE, TAG_SIZE};
use crate::keys::Dek;
use mediavault_common::Result;

/// Per-chunk metadata as it appears in the container.
///
/// The nonce is not stored; it is re-derived from the base nonce and `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Position of the chunk within its file, starting at 0.
    pub index: u64,
    /// Length of the ciphertext (equal to the plaintext length).
    pub ciphertext_len: u32,
    /// Poly1305 tag of the chunk.
    pub tag: [u8; TAG_SIZE],
}

/// Derive the nonce for chunk `index`.
pub fn chunk_nonce(base_nonce: &[u8; NONCE_SIZE], index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base_nonce;
    for (n, i) in nonce[NONCE_SIZE - 8..].iter_mut().zip(index.to_le_bytes()) {
        *n ^= i;
    }
    nonce
}

/// Chunk encryptor/decryptor bound to one file.
///
/// Built from the data key, the file's base nonce, and the encoded container
/// header; the header bytes are mixed into every chunk's associated data.
pub struct ChunkCipher {
    cipher: XChaCha20Poly1305,
    base_nonce: [u8; NONCE_SIZE],
    header: Vec<u8>,
}

impl ChunkCipher {
    /// Create a chunk cipher.
    pub fn new(dek: &Dek, base_nonce: [u8; NONCE_SIZE], header: &[u8]) -> Self {
        Self {
            cipher: cipher(dek.as_bytes()),
            base_nonce,
            header: header.to_vec(),
        }
    }

    fn aad(&self, index: u64) -> Vec<u8> {
        let mut aad = Vec::with_capacity(self.header.len() + 8);
        aad.extend_from_slice(&self.header);
        aad.extend_from_slice(&index.to_le_bytes());
        aad
    }

    /// Encrypt one chunk.
    ///
    /// # Postconditions
    /// - Returns ciphertext of the same length as `plaintext` and its tag
    ///
    /// # Errors
    /// - Returns error if encryption fails
    pub fn encrypt_chunk(&self, index: u64, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; TAG_SIZE])> {
        let nonce = chunk_nonce(&self.base_nonce, index);
        let mut buffer = plaintext.to_vec();
        let tag = encrypt_detached(&self.cipher, &nonce, &self.aad(index), &mut buffer)?;
        Ok((buffer, tag))
    }

    /// Authenticate and decrypt one chunk.
    ///
    /// # Errors
    /// - `Integrity` on any tag mismatch; no plaintext is returned
    pub fn decrypt_chunk(&self, index: u64, ciphertext: &[u8], tag: &[u8; TAG_SIZE]) -> Result<Vec<u8>> {
        let nonce = chunk_nonce(&self.base_nonce, index);
        let mut buffer = ciphertext.to_vec();
        decrypt_detached(&self.cipher, &nonce, &self.aad(index), &mut buffer, tag)?;
        Ok(buffer)
    }
}
