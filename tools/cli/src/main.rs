//! MediaVault CLI - Command line interface for vault operations.
//!
//! This tool provides a command-line interface for creating a vault,
//! importing media into it and getting media back out.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use mediavault_common::{ItemId, SensitiveBytes};
use mediavault_crypto::KdfParams;
use mediavault_vault::{validate_new_password, VaultManager, VaultSettings};

#[derive(Parser)]
#[command(name = "mediavault")]
#[command(about = "MediaVault - Encrypted media vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Vault directory (default: platform data directory).
    #[arg(short = 'p', long, global = true)]
    vault: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault.
    Init {
        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long, default_value = "moderate")]
        strength: String,

        /// Container chunk size in KiB.
        #[arg(short, long, default_value_t = 256)]
        chunk_kib: usize,
    },

    /// Show vault information.
    Info,

    /// Encrypt files into the vault.
    Import {
        /// Files to import.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Decrypt an item to a file.
    Export {
        /// Item identifier.
        id: String,

        /// Destination file path.
        #[arg(short, long)]
        dest: PathBuf,
    },

    /// Authenticate items without writing plaintext.
    Verify {
        /// Item identifier (default: all items).
        id: Option<String>,
    },

    /// List items in the vault.
    List,

    /// Show the structure of an item container.
    Inspect {
        /// Item identifier.
        id: String,
    },

    /// Remove an item from the vault.
    Remove {
        /// Item identifier.
        id: String,
    },

    /// Change vault password.
    ChangePassword,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let vault = match cli.vault {
        Some(path) => path,
        None => default_vault_path()?,
    };

    match cli.command {
        Commands::Init {
            strength,
            chunk_kib,
        } => cmd_init(&vault, &strength, chunk_kib).await,

        Commands::Info => cmd_info(&vault).await,

        Commands::Import { files } => cmd_import(&vault, &files).await,

        Commands::Export { id, dest } => cmd_export(&vault, &id, &dest).await,

        Commands::Verify { id } => cmd_verify(&vault, id.as_deref()).await,

        Commands::List => cmd_list(&vault).await,

        Commands::Inspect { id } => cmd_inspect(&vault, &id).await,

        Commands::Remove { id } => cmd_remove(&vault, &id).await,

        Commands::ChangePassword => cmd_change_password(&vault).await,
    }
}

fn default_vault_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context("Could not determine data directory")?;
    Ok(data_dir.join("mediavault"))
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<SensitiveBytes> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(SensitiveBytes::from(password))
}

/// Prompt for a new password twice and apply the password rules.
fn prompt_new_password(prompt: &str) -> Result<SensitiveBytes> {
    let password = prompt_password(prompt)?;
    let confirm = prompt_password("Confirm password: ")?;
    validate_new_password(password.as_bytes(), confirm.as_bytes())?;
    Ok(password)
}

/// Convert the `--chunk-kib` argument to bytes.
fn chunk_size_from_kib(kib: usize) -> Result<usize> {
    kib.checked_mul(1024)
        .with_context(|| format!("Chunk size of {} KiB is too large", kib))
}

fn parse_id(id: &str) -> Result<ItemId> {
    ItemId::parse(id).with_context(|| format!("Invalid item id: {}", id))
}

/// Open the vault and unlock it with a prompted password.
async fn open_unlocked(path: &Path) -> Result<VaultManager> {
    let manager = VaultManager::open(path)
        .await
        .with_context(|| format!("Failed to open vault at {}", path.display()))?;

    let password = prompt_password("Enter password: ")?;
    manager
        .session()
        .unlock(password.as_bytes())
        .await
        .context("Failed to unlock vault")?;

    Ok(manager)
}

/// Create a new vault.
async fn cmd_init(path: &Path, strength: &str, chunk_kib: usize) -> Result<()> {
    info!("Creating new vault at: {}", path.display());

    let settings = VaultSettings {
        kdf: KdfParams::from_preset(strength)?,
        chunk_size: chunk_size_from_kib(chunk_kib)?,
        ..VaultSettings::default()
    };
    settings.validate().context("Invalid vault settings")?;

    let password = prompt_new_password("Enter password: ")?;

    let manager = VaultManager::create(path, password.as_bytes(), settings)
        .await
        .context("Failed to create vault")?;

    println!("Vault created successfully!");
    println!("  Location: {}", manager.root().display());
    println!("  KDF strength: {}", strength);
    println!("  Chunk size: {} KiB", chunk_kib);

    Ok(())
}

/// Show vault information.
async fn cmd_info(path: &Path) -> Result<()> {
    let manager = VaultManager::open(path)
        .await
        .context("Failed to open vault")?;
    let record = manager.record().await.context("Failed to read vault")?;
    let items = manager.list_items().await?;
    let settings = manager.settings();

    println!("Vault Information:");
    println!("  Location: {}", manager.root().display());
    println!("  Version: {}.{}", record.version.major, record.version.minor);
    println!("  Created: {}", record.created_at);
    println!("  Modified: {}", record.modified_at);
    println!("  Items: {}", items.len());
    println!("  Chunk size: {} KiB", settings.chunk_size / 1024);
    match settings.idle_timeout() {
        Some(timeout) => println!("  Idle timeout: {}s", timeout.as_secs()),
        None => println!("  Idle timeout: disabled"),
    }
    println!("  KDF Parameters:");
    println!("    Memory: {} KiB", record.kdf_params.memory_cost);
    println!("    Time: {} iterations", record.kdf_params.time_cost);
    println!("    Parallelism: {}", record.kdf_params.parallelism);

    Ok(())
}

/// Encrypt files into the vault.
async fn cmd_import(path: &Path, files: &[PathBuf]) -> Result<()> {
    let manager = open_unlocked(path).await?;

    for file in files {
        info!("Importing {}", file.display());
        let (id, summary) = manager
            .import(file)
            .await
            .with_context(|| format!("Failed to import {}", file.display()))?;

        println!(
            "{}  {} ({} bytes, {} chunks)",
            id,
            file.display(),
            summary.plaintext_len,
            summary.chunk_count
        );
    }

    manager.session().lock().await;
    Ok(())
}

/// Decrypt an item to a file.
async fn cmd_export(path: &Path, id: &str, dest: &Path) -> Result<()> {
    let id = parse_id(id)?;
    let manager = open_unlocked(path).await?;

    let written = manager
        .export(&id, dest)
        .await
        .context("Failed to export item")?;
    manager.session().lock().await;

    println!(
        "Item exported successfully: {} ({} bytes)",
        dest.display(),
        written
    );

    Ok(())
}

/// Authenticate one or all items.
async fn cmd_verify(path: &Path, id: Option<&str>) -> Result<()> {
    let manager = open_unlocked(path).await?;

    let ids = match id {
        Some(id) => vec![parse_id(id)?],
        None => manager
            .list_items()
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect(),
    };

    let mut failures = 0usize;
    for id in &ids {
        match manager.verify_item(id).await {
            Ok(len) => println!("OK      {}  ({} bytes)", id, len),
            Err(e) => {
                warn!(item = %id, "Verification failed");
                println!("FAILED  {}  ({})", id, e);
                failures += 1;
            }
        }
    }
    manager.session().lock().await;

    if failures > 0 {
        anyhow::bail!("{} of {} items failed verification", failures, ids.len());
    }
    println!("{} items verified.", ids.len());

    Ok(())
}

/// List items in the vault.
async fn cmd_list(path: &Path) -> Result<()> {
    let manager = VaultManager::open(path)
        .await
        .context("Failed to open vault")?;
    let items = manager.list_items().await.context("Failed to list items")?;

    if items.is_empty() {
        println!("Vault is empty.");
    } else {
        for item in items {
            println!("{}  {:>12} bytes  {}", item.id, item.size, item.modified);
        }
    }

    Ok(())
}

/// Show the structure of an item container.
async fn cmd_inspect(path: &Path, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let manager = VaultManager::open(path)
        .await
        .context("Failed to open vault")?;
    let container = manager
        .inspect_item(&id)
        .await
        .context("Failed to read container")?;

    println!("Container {}:", id);
    println!("  Format version: {}", container.header.format_version);
    println!("  Chunk size: {} bytes", container.header.chunk_size());
    println!("  Chunks: {}", container.chunk_count());
    println!("  Plaintext: {} bytes", container.plaintext_len());
    println!("  Encoded: {} bytes", container.encoded_len());

    Ok(())
}

/// Remove an item from the vault.
async fn cmd_remove(path: &Path, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let manager = open_unlocked(path).await?;

    manager
        .remove_item(&id)
        .await
        .context("Failed to remove item")?;
    manager.session().lock().await;

    println!("Item removed: {}", id);

    Ok(())
}

/// Change vault password.
async fn cmd_change_password(path: &Path) -> Result<()> {
    info!("Changing vault password");

    let manager = VaultManager::open(path)
        .await
        .context("Failed to open vault")?;

    let old_password = prompt_password("Enter current password: ")?;
    manager
        .session()
        .unlock(old_password.as_bytes())
        .await
        .context("Failed to unlock vault")?;

    let new_password = prompt_new_password("Enter new password: ")?;

    manager
        .session()
        .change_password(old_password.as_bytes(), new_password.as_bytes())
        .await
        .context("Failed to change password")?;
    manager.session().lock().await;

    println!("Password changed successfully!");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_from_kib() {
        assert_eq!(chunk_size_from_kib(256).unwrap(), 256 * 1024);
        assert!(chunk_size_from_kib(usize::MAX).is_err());
        assert!(chunk_size_from_kib(usize::MAX / 1024 + 1).is_err());
    }

    #[test]
    fn test_oversized_chunk_rejected_before_prompt() {
        let settings = VaultSettings {
            chunk_size: chunk_size_from_kib(usize::MAX / 1024).unwrap(),
            ..VaultSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
