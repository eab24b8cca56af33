//! Persistence backends for MediaVault.
//!
//! The vault core treats the credential record as an opaque blob that is
//! read and replaced wholesale. This module provides the [`RecordStore`]
//! trait for that blob plus the local directory layout in which encrypted
//! item containers live.
//!
//! # Design Principles
//! - Whole-record writes: a reader never observes a partially written record
//! - No key material: stores only ever see wrapped keys and ciphertext
//! - Async operations: all I/O operations are async

pub mod local;
pub mod memory;
pub mod provider;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use provider::{ItemMetadata, RecordStore};
