//! Vault file operations with encryption/decryption.
//!
//! Every operation takes one key snapshot from the session up front, so a
//! concurrent lock never interrupts it half-way. File work runs on the
//! blocking pool.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::session::SessionKeyManager;
use mediavault_common::{Error, Result};
use mediavault_crypto::{
    decrypt_bytes, decrypt_from_container, encrypt_bytes, encrypt_to_container, ContainerSummary,
};

/// Vault operations handler.
///
/// Provides encrypted file operations using the session's data key.
#[derive(Clone)]
pub struct VaultOperations {
    session: Arc<SessionKeyManager>,
    chunk_size: usize,
}

impl VaultOperations {
    /// Create an operations handler.
    ///
    /// # Errors
    /// - `InvalidInput` if `chunk_size` is out of range
    pub fn new(session: Arc<SessionKeyManager>, chunk_size: usize) -> Result<Self> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(Error::InvalidInput(format!("Invalid chunk size: {}", chunk_size)));
        }
        Ok(Self { session, chunk_size })
    }

    /// Chunk size used for new containers.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Encrypt an in-memory buffer into a container.
    ///
    /// # Errors
    /// - `VaultLocked` if the session is locked
    pub async fn seal_bytes(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.session.active_key().await?;
        encrypt_bytes(plaintext, &key, self.chunk_size)
    }

    /// Decrypt an in-memory container.
    ///
    /// # Errors
    /// - `VaultLocked` if the session is locked
    /// - `Integrity` if the container fails authentication
    pub async fn open_bytes(&self, container: &[u8]) -> Result<Vec<u8>> {
        let key = self.session.active_key().await?;
        decrypt_bytes(container, &key)
    }

    /// Encrypt the file at `source` into a container at `dest`.
    ///
    /// # Postconditions
    /// - `dest` appears only once the container is complete
    ///
    /// # Errors
    /// - `VaultLocked` if the session is locked
    /// - I/O failure; no partial container is left at `dest`
    pub async fn import_file(&self, source: &Path, dest: &Path) -> Result<ContainerSummary> {
        let key = self.session.active_key().await?;
        let chunk_size = self.chunk_size;
        let source = source.to_path_buf();
        let dest = dest.to_path_buf();

        debug!(source = %source.display(), "Importing file");

        let summary = run_blocking(move || {
            let input = BufReader::new(File::open(&source)?);
            let staged = staging_file(&dest, ".import-")?;
            let summary = encrypt_to_container(input, BufWriter::new(staged.as_file()), &key, chunk_size)?;
            staged.as_file().sync_all()?;
            persist(staged, &dest)?;
            Ok(summary)
        })
        .await?;

        info!(
            chunks = summary.chunk_count,
            size = summary.plaintext_len,
            "File imported"
        );
        Ok(summary)
    }

    /// Decrypt the container at `source` to a plaintext file at `dest`.
    ///
    /// Plaintext is staged next to `dest` and moved into place only after the
    /// whole container, including its file tag, has verified.
    ///
    /// # Errors
    /// - `VaultLocked` if the session is locked
    /// - `Integrity` if the container fails authentication; nothing is
    ///   written to `dest`
    pub async fn export_file(&self, source: &Path, dest: &Path) -> Result<u64> {
        let key = self.session.active_key().await?;
        let source = source.to_path_buf();
        let dest = dest.to_path_buf();

        debug!(dest = %dest.display(), "Exporting file");

        let result = run_blocking(move || {
            let input = BufReader::new(File::open(&source)?);
            let staged = staging_file(&dest, ".export-")?;
            let written = decrypt_from_container(input, BufWriter::new(staged.as_file()), &key)?;
            persist(staged, &dest)?;
            Ok(written)
        })
        .await;

        match result {
            Ok(written) => {
                info!(size = written, "File exported");
                Ok(written)
            }
            Err(e) => {
                if e.is_integrity_failure() {
                    warn!("Export discarded: container failed authentication");
                }
                Err(e)
            }
        }
    }

    /// Fully authenticate the container at `source` without keeping plaintext.
    ///
    /// # Returns
    /// - Plaintext length on success
    pub async fn verify_file(&self, source: &Path) -> Result<u64> {
        let key = self.session.active_key().await?;
        let source = source.to_path_buf();

        run_blocking(move || {
            let input = BufReader::new(File::open(&source)?);
            decrypt_from_container(input, io::sink(), &key)
        })
        .await
    }
}

/// Run CPU-bound or blocking work off the async executor.
pub(crate) async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| Error::Storage(format!("Blocking task failed: {}", e)))?
}

fn staging_file(dest: &Path, prefix: &str) -> Result<NamedTempFile> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok(tempfile::Builder::new().prefix(prefix).tempfile_in(dir)?)
}

fn persist(staged: NamedTempFile, dest: &Path) -> Result<()> {
    staged.persist(dest).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediavault_crypto::KdfParams;
    use mediavault_storage::MemoryStore;
    use tempfile::TempDir;

    async fn unlocked_ops() -> (VaultOperations, Arc<SessionKeyManager>) {
        let session = Arc::new(SessionKeyManager::new(
            Arc::new(MemoryStore::new()),
            KdfParams::minimal(),
        ));
        session.setup(b"Sunflower42!").await.unwrap();
        let ops = VaultOperations::new(Arc::clone(&session), MIN_CHUNK_SIZE).unwrap();
        (ops, session)
    }

    fn media(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn test_chunk_size_validated() {
        let session = Arc::new(SessionKeyManager::new(
            Arc::new(MemoryStore::new()),
            KdfParams::minimal(),
        ));
        assert!(VaultOperations::new(Arc::clone(&session), 0).is_err());
        assert!(VaultOperations::new(Arc::clone(&session), MAX_CHUNK_SIZE + 1).is_err());
        assert!(VaultOperations::new(session, MIN_CHUNK_SIZE).is_ok());
    }

    #[tokio::test]
    async fn test_seal_and_open_bytes() {
        let (ops, _) = unlocked_ops().await;
        let data = media(10_000);

        let sealed = ops.seal_bytes(&data).await.unwrap();
        assert_eq!(ops.open_bytes(&sealed).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_sunflower_scenario() {
        let (ops, session) = unlocked_ops().await;
        let data = vec![0xABu8; MIN_CHUNK_SIZE + MIN_CHUNK_SIZE / 2];

        let sealed = ops.seal_bytes(&data).await.unwrap();
        let container = mediavault_crypto::VaultFileContainer::from_bytes(&sealed).unwrap();
        assert_eq!(container.chunk_count(), 2);
        assert_eq!(ops.open_bytes(&sealed).await.unwrap(), data);

        session.lock().await;
        assert!(matches!(ops.open_bytes(&sealed).await, Err(Error::VaultLocked)));
    }

    #[tokio::test]
    async fn test_operations_fail_when_locked() {
        let (ops, session) = unlocked_ops().await;
        let sealed = ops.seal_bytes(b"x").await.unwrap();
        session.lock().await;

        assert!(matches!(ops.seal_bytes(b"x").await, Err(Error::VaultLocked)));
        assert!(matches!(ops.open_bytes(&sealed).await, Err(Error::VaultLocked)));
    }

    #[tokio::test]
    async fn test_import_export_file() {
        let (ops, _) = unlocked_ops().await;
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("beach.jpg");
        let container = temp.path().join("beach.mvc");
        let restored = temp.path().join("restored.jpg");
        let data = media(MIN_CHUNK_SIZE * 3 + 17);
        std::fs::write(&source, &data).unwrap();

        let summary = ops.import_file(&source, &container).await.unwrap();
        assert_eq!(summary.chunk_count, 4);
        assert_eq!(summary.plaintext_len, data.len() as u64);
        assert_ne!(std::fs::read(&container).unwrap()[..64], data[..64]);

        assert_eq!(ops.verify_file(&container).await.unwrap(), data.len() as u64);

        let written = ops.export_file(&container, &restored).await.unwrap();
        assert_eq!(written, data.len() as u64);
        assert_eq!(std::fs::read(&restored).unwrap(), data);
    }

    #[tokio::test]
    async fn test_tampered_export_leaves_no_output() {
        let (ops, _) = unlocked_ops().await;
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("clip.mp4");
        let container = temp.path().join("clip.mvc");
        let restored = temp.path().join("clip-out.mp4");
        std::fs::write(&source, media(MIN_CHUNK_SIZE * 2)).unwrap();

        ops.import_file(&source, &container).await.unwrap();
        let mut bytes = std::fs::read(&container).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        std::fs::write(&container, &bytes).unwrap();

        let result = ops.export_file(&container, &restored).await;
        assert!(matches!(result, Err(Error::Integrity(_))));
        assert!(!restored.exists());
        assert!(ops.verify_file(&container).await.is_err());

        // staging files are cleaned up
        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.starts_with(".export-")));
    }

    #[tokio::test]
    async fn test_import_missing_source() {
        let (ops, _) = unlocked_ops().await;
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("out.mvc");

        let result = ops.import_file(&temp.path().join("missing"), &dest).await;
        assert!(matches!(result, Err(Error::Io(_))));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_container_survives_password_change() {
        let (ops, session) = unlocked_ops().await;
        let sealed = ops.seal_bytes(b"holiday").await.unwrap();

        session.change_password(b"Sunflower42!", b"Tulip7#x").await.unwrap();
        session.lock().await;
        session.unlock(b"Tulip7#x").await.unwrap();

        assert_eq!(ops.open_bytes(&sealed).await.unwrap(), b"holiday");
    }
}
