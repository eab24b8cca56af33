//! On-disk container format for encrypted media items.
//!
//! # Format
//! All integers are little endian.
//! - Header: format_version (1) + base_nonce (24) + chunk_size (4)
//! - Chunks: index (8) + ciphertext_len (4) + ciphertext + tag (16)
//! - Trailer: file_auth_tag (32)
//!
//! The final chunk is the first one whose `ciphertext_len` is smaller than
//! `chunk_size`. It may be empty: an input whose length is a multiple of the
//! chunk size ends with an empty chunk, and an empty input is a single empty
//! chunk. `file_auth_tag` is a keyed BLAKE2b MAC over the header and every
//! chunk's index, length and tag, which rejects reordered, dropped or
//! appended chunks that individually still authenticate.

use blake2::digest::{consts::U32, Mac};
use blake2::Blake2bMac;
use std::io::{self, Read, Write};
use tracing::debug;

use crate::aead::{generate_nonce, NONCE_SIZE, TAG_SIZE};
use crate::keys::Dek;
use crate::stream::{ChunkCipher, ChunkHeader};
use mediavault_common::{Error, Result};

/// Current container format version.
pub const FORMAT_VERSION: u8 = 1;

/// Default chunk size for new containers (256 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Largest chunk size a reader will accept (16 MiB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Header size: version (1) + base_nonce (24) + chunk_size (4).
pub const HEADER_SIZE: usize = 1 + NONCE_SIZE + 4;

/// Size of the trailing file authentication tag.
pub const FILE_TAG_SIZE: usize = 32;

/// Container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Format version of the container.
    pub format_version: u8,
    /// Random per-file base nonce for chunk nonces.
    pub base_nonce: [u8; NONCE_SIZE],
    /// Plaintext bytes per full chunk.
    pub chunk_size: u32,
}

impl ContainerHeader {
    /// Create a header for a new container with a fresh base nonce.
    ///
    /// # Errors
    /// - Returns error if `chunk_size` is zero or above [`MAX_CHUNK_SIZE`]
    pub fn generate(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidInput(format!(
                "Chunk size must be between 1 and {} bytes, got {}",
                MAX_CHUNK_SIZE, chunk_size
            )));
        }

        Ok(Self {
            format_version: FORMAT_VERSION,
            base_nonce: generate_nonce(),
            chunk_size: chunk_size as u32,
        })
    }

    /// Encode the header.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.format_version;
        out[1..1 + NONCE_SIZE].copy_from_slice(&self.base_nonce);
        out[1 + NONCE_SIZE..].copy_from_slice(&self.chunk_size.to_le_bytes());
        out
    }

    /// Read and validate a header.
    ///
    /// # Errors
    /// - `UnsupportedFormat` for an unknown version or an invalid chunk size
    /// - `Integrity` if the input ends inside the header
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut version = [0u8; 1];
        read_exact(reader, &mut version, "header")?;
        if version[0] != FORMAT_VERSION {
            return Err(Error::UnsupportedFormat(format!(
                "Unsupported container version: {}",
                version[0]
            )));
        }

        let mut base_nonce = [0u8; NONCE_SIZE];
        read_exact(reader, &mut base_nonce, "header")?;

        let mut chunk_size_bytes = [0u8; 4];
        read_exact(reader, &mut chunk_size_bytes, "header")?;
        let chunk_size = u32::from_le_bytes(chunk_size_bytes);
        if chunk_size == 0 || chunk_size as usize > MAX_CHUNK_SIZE {
            return Err(Error::UnsupportedFormat(format!(
                "Unsupported chunk size: {}",
                chunk_size
            )));
        }

        Ok(Self {
            format_version: version[0],
            base_nonce,
            chunk_size,
        })
    }

    /// Chunk size as `usize`.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size as usize
    }
}

/// One encrypted chunk as stored in the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedChunk {
    /// Index, ciphertext length and Poly1305 tag.
    pub header: ChunkHeader,
    /// Encrypted chunk bytes, tag excluded.
    pub ciphertext: Vec<u8>,
}

impl EncryptedChunk {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.header.index.to_le_bytes())?;
        writer.write_all(&self.header.ciphertext_len.to_le_bytes())?;
        writer.write_all(&self.ciphertext)?;
        writer.write_all(&self.header.tag)?;
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R, chunk_size: usize) -> Result<Self> {
        let mut index = [0u8; 8];
        read_exact(reader, &mut index, "chunk header")?;
        let mut len = [0u8; 4];
        read_exact(reader, &mut len, "chunk header")?;

        let index = u64::from_le_bytes(index);
        let ciphertext_len = u32::from_le_bytes(len);
        if ciphertext_len as usize > chunk_size {
            return Err(Error::Integrity(format!(
                "Chunk {} is longer than the chunk size",
                index
            )));
        }

        let mut ciphertext = vec![0u8; ciphertext_len as usize];
        read_exact(reader, &mut ciphertext, "chunk body")?;
        let mut tag = [0u8; TAG_SIZE];
        read_exact(reader, &mut tag, "chunk tag")?;

        Ok(Self {
            header: ChunkHeader {
                index,
                ciphertext_len,
                tag,
            },
            ciphertext,
        })
    }

    fn is_final(&self, chunk_size: usize) -> bool {
        (self.header.ciphertext_len as usize) < chunk_size
    }
}

/// Read exactly `buf.len()` bytes, reporting early EOF as truncation.
fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::Integrity(format!("Container truncated in {}", what)),
        _ => Error::Io(e),
    })
}

/// Running MAC over the ordered chunk sequence.
#[derive(Clone)]
struct FileAuthenticator {
    mac: Blake2bMac<U32>,
    chunks: u64,
}

impl FileAuthenticator {
    fn new(dek: &Dek, header: &ContainerHeader) -> Result<Self> {
        let mac_key = dek.derive_mac_key(&header.base_nonce);
        let mut mac = Blake2bMac::<U32>::new_from_slice(mac_key.as_bytes())
            .map_err(|e| Error::Crypto(format!("Invalid MAC key: {}", e)))?;
        mac.update(&header.to_bytes());
        Ok(Self { mac, chunks: 0 })
    }

    fn absorb(&mut self, chunk: &ChunkHeader) {
        self.mac.update(&chunk.index.to_le_bytes());
        self.mac.update(&chunk.ciphertext_len.to_le_bytes());
        self.mac.update(&chunk.tag);
        self.chunks += 1;
    }

    fn finalize(&self) -> [u8; FILE_TAG_SIZE] {
        let mut mac = self.mac.clone();
        mac.update(&self.chunks.to_le_bytes());
        let mut out = [0u8; FILE_TAG_SIZE];
        out.copy_from_slice(&mac.finalize().into_bytes());
        out
    }

    fn verify(&self, tag: &[u8; FILE_TAG_SIZE]) -> Result<()> {
        let mut mac = self.mac.clone();
        mac.update(&self.chunks.to_le_bytes());
        mac.verify_slice(tag)
            .map_err(|_| Error::Integrity("File authentication tag mismatch".to_string()))
    }
}

/// Outcome of sealing a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Number of chunks written, including the final one.
    pub chunk_count: u64,
    /// Plaintext bytes consumed.
    pub plaintext_len: u64,
}

/// Streaming container encryptor.
///
/// Writes the header on construction and a chunk every time `chunk_size`
/// plaintext bytes have been buffered. [`ContainerWriter::finish`] must be
/// called to write the final chunk and the file tag; a writer dropped
/// without finishing leaves a container that fails verification.
pub struct ContainerWriter<W: Write> {
    writer: W,
    cipher: ChunkCipher,
    auth: FileAuthenticator,
    chunk_size: usize,
    buffer: Vec<u8>,
    next_index: u64,
    plaintext_len: u64,
}

impl<W: Write> ContainerWriter<W> {
    /// Start a new container on `writer`.
    ///
    /// # Errors
    /// - Invalid chunk size
    /// - I/O errors writing the header
    pub fn new(mut writer: W, dek: &Dek, chunk_size: usize) -> Result<Self> {
        let header = ContainerHeader::generate(chunk_size)?;
        let header_bytes = header.to_bytes();
        writer.write_all(&header_bytes)?;

        Ok(Self {
            writer,
            cipher: ChunkCipher::new(dek, header.base_nonce, &header_bytes),
            auth: FileAuthenticator::new(dek, &header)?,
            chunk_size,
            buffer: Vec::with_capacity(chunk_size),
            next_index: 0,
            plaintext_len: 0,
        })
    }

    /// Feed plaintext into the container.
    pub fn update(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let take = (self.chunk_size - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.buffer.len() == self.chunk_size {
                self.emit_chunk()?;
            }
        }
        Ok(())
    }

    fn emit_chunk(&mut self) -> Result<()> {
        let index = self.next_index;
        let (ciphertext, tag) = self.cipher.encrypt_chunk(index, &self.buffer)?;
        let chunk = EncryptedChunk {
            header: ChunkHeader {
                index,
                ciphertext_len: ciphertext.len() as u32,
                tag,
            },
            ciphertext,
        };

        chunk.write_to(&mut self.writer)?;
        self.auth.absorb(&chunk.header);
        self.plaintext_len += self.buffer.len() as u64;
        self.next_index += 1;
        self.buffer.clear();
        Ok(())
    }

    /// Write the final chunk and the file tag.
    ///
    /// # Postconditions
    /// - The container is complete and returns the inner writer
    pub fn finish(mut self) -> Result<(W, ContainerSummary)> {
        // buffer is always shorter than chunk_size here
        self.emit_chunk()?;
        self.writer.write_all(&self.auth.finalize())?;
        self.writer.flush()?;

        let summary = ContainerSummary {
            chunk_count: self.next_index,
            plaintext_len: self.plaintext_len,
        };
        debug!(
            chunks = summary.chunk_count,
            bytes = summary.plaintext_len,
            "Container sealed"
        );
        Ok((self.writer, summary))
    }
}

impl<W: Write> Write for ContainerWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf).map_err(into_io_error)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // partial chunks are only written by finish()
        self.writer.flush()
    }
}

fn into_io_error(e: Error) -> io::Error {
    match e {
        Error::Io(e) => e,
        other => io::Error::other(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Reading,
    Verified,
    Failed,
}

/// Streaming container decryptor.
///
/// Yields one authenticated chunk of plaintext at a time. Chunks before the
/// last are released once their own tag verifies; the file tag is checked
/// together with the final chunk, and only then does
/// [`ContainerReader::is_verified`] become true. After any error the reader
/// is poisoned, and every plaintext chunk already obtained from it must be
/// discarded by the caller.
pub struct ContainerReader<R: Read> {
    reader: R,
    header: ContainerHeader,
    cipher: ChunkCipher,
    auth: FileAuthenticator,
    next_index: u64,
    plaintext_len: u64,
    state: ReadState,
}

impl<R: Read> ContainerReader<R> {
    /// Open a container and validate its header.
    ///
    /// # Errors
    /// - `UnsupportedFormat` for unknown versions
    /// - `Integrity` for a truncated header
    pub fn open(mut reader: R, dek: &Dek) -> Result<Self> {
        let header = ContainerHeader::read_from(&mut reader)?;

        Ok(Self {
            cipher: ChunkCipher::new(dek, header.base_nonce, &header.to_bytes()),
            auth: FileAuthenticator::new(dek, &header)?,
            reader,
            header,
            next_index: 0,
            plaintext_len: 0,
            state: ReadState::Reading,
        })
    }

    /// Container header.
    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// True once every chunk and the file tag have been verified.
    pub fn is_verified(&self) -> bool {
        self.state == ReadState::Verified
    }

    /// Plaintext bytes released so far.
    pub fn plaintext_len(&self) -> u64 {
        self.plaintext_len
    }

    /// Decrypt the next chunk.
    ///
    /// # Returns
    /// - `Ok(Some(plaintext))` for each chunk in order (the final chunk may
    ///   be empty)
    /// - `Ok(None)` after the container has been fully verified
    ///
    /// # Errors
    /// - `Integrity` on any tag mismatch, reordering, truncation or trailing
    ///   data; all later calls fail as well
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.state {
            ReadState::Verified => return Ok(None),
            ReadState::Failed => {
                return Err(Error::Integrity(
                    "Container already failed verification".to_string(),
                ))
            }
            ReadState::Reading => {}
        }

        match self.read_next() {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(e) => {
                self.state = ReadState::Failed;
                Err(e)
            }
        }
    }

    fn read_next(&mut self) -> Result<Vec<u8>> {
        let chunk_size = self.header.chunk_size();
        let chunk = EncryptedChunk::read_from(&mut self.reader, chunk_size)?;

        if chunk.header.index != self.next_index {
            return Err(Error::Integrity(format!(
                "Chunk out of order: expected {}, found {}",
                self.next_index, chunk.header.index
            )));
        }

        let plaintext =
            self.cipher
                .decrypt_chunk(chunk.header.index, &chunk.ciphertext, &chunk.header.tag)?;
        self.auth.absorb(&chunk.header);
        self.next_index += 1;

        if chunk.is_final(chunk_size) {
            let mut file_tag = [0u8; FILE_TAG_SIZE];
            read_exact(&mut self.reader, &mut file_tag, "file tag")?;
            self.auth.verify(&file_tag)?;
            ensure_eof(&mut self.reader)?;

            self.state = ReadState::Verified;
            debug!(chunks = self.next_index, "Container verified");
        }

        self.plaintext_len += plaintext.len() as u64;
        Ok(plaintext)
    }
}

impl<R: Read> Iterator for ContainerReader<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == ReadState::Failed {
            return None;
        }
        self.next_chunk().transpose()
    }
}

fn ensure_eof<R: Read>(reader: &mut R) -> Result<()> {
    let mut probe = [0u8; 1];
    loop {
        match reader.read(&mut probe) {
            Ok(0) => return Ok(()),
            Ok(_) => {
                return Err(Error::Integrity(
                    "Unexpected data after file tag".to_string(),
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Fully parsed container, without decrypting anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultFileContainer {
    /// Fixed-size container header.
    pub header: ContainerHeader,
    /// Chunks in index order.
    pub chunks: Vec<EncryptedChunk>,
    /// Keyed BLAKE2b tag over the header and every chunk.
    pub file_auth_tag: [u8; FILE_TAG_SIZE],
}

impl VaultFileContainer {
    /// Parse the container structure.
    ///
    /// Checks framing only; authentication happens in
    /// [`VaultFileContainer::decrypt`].
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let header = ContainerHeader::read_from(&mut reader)?;
        let chunk_size = header.chunk_size();

        let mut chunks = Vec::new();
        loop {
            let chunk = EncryptedChunk::read_from(&mut reader, chunk_size)?;
            let last = chunk.is_final(chunk_size);
            chunks.push(chunk);
            if last {
                break;
            }
        }

        let mut file_auth_tag = [0u8; FILE_TAG_SIZE];
        read_exact(&mut reader, &mut file_auth_tag, "file tag")?;
        ensure_eof(&mut reader)?;

        Ok(Self {
            header,
            chunks,
            file_auth_tag,
        })
    }

    /// Parse a container held in memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read_from(bytes)
    }

    /// Serialize back to the on-disk layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.header.to_bytes());
        for chunk in &self.chunks {
            out.extend_from_slice(&chunk.header.index.to_le_bytes());
            out.extend_from_slice(&chunk.header.ciphertext_len.to_le_bytes());
            out.extend_from_slice(&chunk.ciphertext);
            out.extend_from_slice(&chunk.header.tag);
        }
        out.extend_from_slice(&self.file_auth_tag);
        out
    }

    /// Number of chunks, including the final one.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Plaintext length implied by the chunk lengths.
    pub fn plaintext_len(&self) -> u64 {
        self.chunks
            .iter()
            .map(|c| c.header.ciphertext_len as u64)
            .sum()
    }

    /// Size of the encoded container in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE
            + self
                .chunks
                .iter()
                .map(|c| 8 + 4 + c.ciphertext.len() + TAG_SIZE)
                .sum::<usize>()
            + FILE_TAG_SIZE
    }

    /// Authenticate and decrypt the whole container.
    pub fn decrypt(&self, dek: &Dek) -> Result<Vec<u8>> {
        decrypt_bytes(&self.to_bytes(), dek)
    }
}

/// Encrypt everything from `reader` into a container on `writer`.
///
/// # Postconditions
/// - Plaintext is read and encrypted one chunk at a time
///
/// # Errors
/// - I/O errors from reader/writer
/// - Invalid chunk size
pub fn encrypt_to_container<R: Read, W: Write>(
    mut reader: R,
    writer: W,
    dek: &Dek,
    chunk_size: usize,
) -> Result<ContainerSummary> {
    let mut container = ContainerWriter::new(writer, dek, chunk_size)?;
    let mut buffer = vec![0u8; chunk_size];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        container.update(&buffer[..n])?;
    }

    let (_, summary) = container.finish()?;
    Ok(summary)
}

/// Decrypt a container from `reader` into `writer`.
///
/// Plaintext is written chunk by chunk as each chunk authenticates. When this
/// returns an error, whatever was already written to `writer` is not
/// authentic as a whole and must be discarded.
///
/// # Errors
/// - `UnsupportedFormat`, `Integrity`, I/O errors
pub fn decrypt_from_container<R: Read, W: Write>(reader: R, mut writer: W, dek: &Dek) -> Result<u64> {
    let mut container = ContainerReader::open(reader, dek)?;

    while let Some(chunk) = container.next_chunk()? {
        writer.write_all(&chunk)?;
    }
    writer.flush()?;

    Ok(container.plaintext_len())
}

/// Encrypt a complete byte slice into a container.
///
/// This is a convenience function for when the complete data is available.
pub fn encrypt_bytes(data: &[u8], dek: &Dek, chunk_size: usize) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    encrypt_to_container(data, &mut output, dek, chunk_size)?;
    Ok(output)
}

/// Decrypt a complete container held in memory.
///
/// Returns plaintext only after the whole container has verified.
pub fn decrypt_bytes(container: &[u8], dek: &Dek) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    decrypt_from_container(container, &mut output, dek)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;
    use proptest::prelude::*;
    use std::io::Cursor;

    const SMALL_CHUNK: usize = 64;

    fn test_dek() -> Dek {
        Dek::from_bytes([42u8; KEY_LENGTH])
    }

    #[test]
    fn test_roundtrip_empty() {
        let dek = test_dek();
        let sealed = encrypt_bytes(b"", &dek, SMALL_CHUNK).unwrap();

        let parsed = VaultFileContainer::from_bytes(&sealed).unwrap();
        assert_eq!(parsed.chunk_count(), 1);
        assert_eq!(parsed.plaintext_len(), 0);

        assert_eq!(decrypt_bytes(&sealed, &dek).unwrap(), b"");
    }

    #[test]
    fn test_roundtrip_single_chunk() {
        let dek = test_dek();
        let plaintext = b"Hello, streaming encryption!";

        let sealed = encrypt_bytes(plaintext, &dek, SMALL_CHUNK).unwrap();
        assert_eq!(decrypt_bytes(&sealed, &dek).unwrap(), plaintext);
    }

    #[test]
    fn test_roundtrip_multiple_chunks() {
        let dek = test_dek();
        let plaintext: Vec<u8> = (0..SMALL_CHUNK * 5 + 17).map(|i| i as u8).collect();

        let sealed = encrypt_bytes(&plaintext, &dek, SMALL_CHUNK).unwrap();
        let parsed = VaultFileContainer::from_bytes(&sealed).unwrap();
        assert_eq!(parsed.chunk_count(), 6);

        assert_eq!(decrypt_bytes(&sealed, &dek).unwrap(), plaintext);
    }

    #[test]
    fn test_one_and_a_half_chunks_is_two_chunks() {
        let dek = test_dek();
        let plaintext = vec![0xABu8; DEFAULT_CHUNK_SIZE + DEFAULT_CHUNK_SIZE / 2];

        let sealed = encrypt_bytes(&plaintext, &dek, DEFAULT_CHUNK_SIZE).unwrap();
        let parsed = VaultFileContainer::from_bytes(&sealed).unwrap();

        assert_eq!(parsed.chunk_count(), 2);
        assert_eq!(parsed.chunks[0].header.ciphertext_len as usize, DEFAULT_CHUNK_SIZE);
        assert_eq!(parsed.chunks[1].header.ciphertext_len as usize, DEFAULT_CHUNK_SIZE / 2);
        assert_eq!(parsed.decrypt(&dek).unwrap(), plaintext);
    }

    #[test]
    fn test_exact_multiple_ends_with_empty_chunk() {
        let dek = test_dek();
        let plaintext = vec![1u8; SMALL_CHUNK * 2];

        let sealed = encrypt_bytes(&plaintext, &dek, SMALL_CHUNK).unwrap();
        let parsed = VaultFileContainer::from_bytes(&sealed).unwrap();

        assert_eq!(parsed.chunk_count(), 3);
        assert_eq!(parsed.chunks[2].header.ciphertext_len, 0);
        assert_eq!(decrypt_bytes(&sealed, &dek).unwrap(), plaintext);
    }

    #[test]
    fn test_header_format() {
        let dek = test_dek();
        let sealed = encrypt_bytes(b"Test", &dek, SMALL_CHUNK).unwrap();

        assert_eq!(sealed[0], FORMAT_VERSION);
        let chunk_size = u32::from_le_bytes(sealed[25..29].try_into().unwrap());
        assert_eq!(chunk_size as usize, SMALL_CHUNK);
        assert_eq!(
            sealed.len(),
            HEADER_SIZE + 8 + 4 + 4 + TAG_SIZE + FILE_TAG_SIZE
        );
    }

    #[test]
    fn test_base_nonce_differs_per_file() {
        let dek = test_dek();
        let a = VaultFileContainer::from_bytes(&encrypt_bytes(b"same", &dek, SMALL_CHUNK).unwrap()).unwrap();
        let b = VaultFileContainer::from_bytes(&encrypt_bytes(b"same", &dek, SMALL_CHUNK).unwrap()).unwrap();

        assert_ne!(a.header.base_nonce, b.header.base_nonce);
        assert_ne!(a.chunks[0].ciphertext, b.chunks[0].ciphertext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt_bytes(b"Secret streaming data", &test_dek(), SMALL_CHUNK).unwrap();
        let other = Dek::from_bytes([1u8; KEY_LENGTH]);

        assert!(matches!(decrypt_bytes(&sealed, &other), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_bit_flip_in_every_ciphertext_byte_fails() {
        let dek = test_dek();
        let plaintext = vec![0x5Cu8; SMALL_CHUNK + 10];
        let sealed = encrypt_bytes(&plaintext, &dek, SMALL_CHUNK).unwrap();
        let parsed = VaultFileContainer::from_bytes(&sealed).unwrap();

        for chunk_idx in 0..parsed.chunk_count() {
            for byte in 0..parsed.chunks[chunk_idx].ciphertext.len() {
                let mut tampered = parsed.clone();
                tampered.chunks[chunk_idx].ciphertext[byte] ^= 0x01;
                assert!(matches!(tampered.decrypt(&dek), Err(Error::Integrity(_))));
            }
        }
    }

    #[test]
    fn test_bit_flip_in_file_tag_fails() {
        let dek = test_dek();
        let sealed = encrypt_bytes(&[7u8; 100], &dek, SMALL_CHUNK).unwrap();

        for byte in sealed.len() - FILE_TAG_SIZE..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[byte] ^= 0x80;
            assert!(matches!(decrypt_bytes(&tampered, &dek), Err(Error::Integrity(_))));
        }
    }

    #[test]
    fn test_reordered_chunks_fail() {
        let dek = test_dek();
        let plaintext: Vec<u8> = (0..SMALL_CHUNK * 3).map(|i| (i / SMALL_CHUNK) as u8).collect();
        let sealed = encrypt_bytes(&plaintext, &dek, SMALL_CHUNK).unwrap();

        let mut swapped = VaultFileContainer::from_bytes(&sealed).unwrap();
        swapped.chunks.swap(0, 1);
        assert!(matches!(swapped.decrypt(&dek), Err(Error::Integrity(_))));

        // renumbering does not help: the nonce and AAD are bound to the index
        swapped.chunks[0].header.index = 0;
        swapped.chunks[1].header.index = 1;
        assert!(matches!(swapped.decrypt(&dek), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_truncation_fails() {
        let dek = test_dek();
        let sealed = encrypt_bytes(&vec![9u8; SMALL_CHUNK * 2 + 5], &dek, SMALL_CHUNK).unwrap();

        // Drop only the file tag
        let no_tag = &sealed[..sealed.len() - FILE_TAG_SIZE];
        assert!(matches!(decrypt_bytes(no_tag, &dek), Err(Error::Integrity(_))));

        // Drop the final chunk and keep the tag
        let mut parsed = VaultFileContainer::from_bytes(&sealed).unwrap();
        parsed.chunks.pop();
        assert!(matches!(decrypt_bytes(&parsed.to_bytes(), &dek), Err(Error::Integrity(_))));

        // Header only
        assert!(matches!(decrypt_bytes(&sealed[..HEADER_SIZE], &dek), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_trailing_data_fails() {
        let dek = test_dek();
        let mut sealed = encrypt_bytes(b"data", &dek, SMALL_CHUNK).unwrap();
        sealed.push(0);

        assert!(matches!(decrypt_bytes(&sealed, &dek), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let dek = test_dek();
        let mut sealed = encrypt_bytes(b"data", &dek, SMALL_CHUNK).unwrap();
        sealed[0] = 9;

        assert!(matches!(decrypt_bytes(&sealed, &dek), Err(Error::UnsupportedFormat(_))));
        assert!(matches!(
            VaultFileContainer::from_bytes(&sealed),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_invalid_chunk_size_in_header() {
        let dek = test_dek();
        let mut sealed = encrypt_bytes(b"data", &dek, SMALL_CHUNK).unwrap();
        sealed[25..29].copy_from_slice(&0u32.to_le_bytes());

        assert!(matches!(decrypt_bytes(&sealed, &dek), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_writer_rejects_bad_chunk_size() {
        let dek = test_dek();
        assert!(ContainerWriter::new(Vec::new(), &dek, 0).is_err());
        assert!(ContainerWriter::new(Vec::new(), &dek, MAX_CHUNK_SIZE + 1).is_err());
    }

    #[test]
    fn test_writer_via_io_copy() {
        let dek = test_dek();
        let plaintext: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

        let mut writer = ContainerWriter::new(Vec::new(), &dek, SMALL_CHUNK).unwrap();
        std::io::copy(&mut Cursor::new(&plaintext), &mut writer).unwrap();
        let (sealed, summary) = writer.finish().unwrap();

        assert_eq!(summary.plaintext_len, 1000);
        assert_eq!(summary.chunk_count, 16);
        assert_eq!(decrypt_bytes(&sealed, &dek).unwrap(), plaintext);
    }

    #[test]
    fn test_unfinished_writer_fails_verification() {
        let dek = test_dek();
        let mut writer = ContainerWriter::new(Vec::new(), &dek, SMALL_CHUNK).unwrap();
        writer.update(&[3u8; SMALL_CHUNK * 2]).unwrap();
        let partial = writer.writer.clone();

        assert!(matches!(decrypt_bytes(&partial, &dek), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_reader_flags_late_failure() {
        let dek = test_dek();
        let sealed = encrypt_bytes(&vec![4u8; SMALL_CHUNK * 2 + 1], &dek, SMALL_CHUNK).unwrap();
        let mut parsed = VaultFileContainer::from_bytes(&sealed).unwrap();
        parsed.chunks[2].ciphertext[0] ^= 1;
        let tampered = parsed.to_bytes();

        let mut reader = ContainerReader::open(tampered.as_slice(), &dek).unwrap();
        assert!(reader.next_chunk().unwrap().is_some());
        assert!(reader.next_chunk().unwrap().is_some());
        assert!(!reader.is_verified());

        assert!(matches!(reader.next_chunk(), Err(Error::Integrity(_))));
        assert!(!reader.is_verified());
        // poisoned
        assert!(reader.next_chunk().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_reader_verified_after_last_chunk() {
        let dek = test_dek();
        let sealed = encrypt_bytes(&[8u8; 100], &dek, SMALL_CHUNK).unwrap();

        let mut reader = ContainerReader::open(sealed.as_slice(), &dek).unwrap();
        let chunks: Vec<Vec<u8>> = reader.by_ref().collect::<Result<_>>().unwrap();

        assert_eq!(chunks.len(), 2);
        assert!(reader.is_verified());
        assert_eq!(reader.plaintext_len(), 100);
        assert!(reader.next_chunk().unwrap().is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..600), chunk_size in 1usize..128) {
            let dek = test_dek();
            let sealed = encrypt_bytes(&data, &dek, chunk_size).unwrap();
            prop_assert_eq!(decrypt_bytes(&sealed, &dek).unwrap(), data);
        }

        #[test]
        fn prop_any_bit_flip_fails(data in proptest::collection::vec(any::<u8>(), 0..300), pos in any::<prop::sample::Index>(), bit in 0u8..8) {
            let dek = test_dek();
            let mut sealed = encrypt_bytes(&data, &dek, 32).unwrap();
            let idx = pos.index(sealed.len());
            sealed[idx] ^= 1 << bit;
            prop_assert!(decrypt_bytes(&sealed, &dek).is_err());
        }
    }
}
