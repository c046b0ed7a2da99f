//! Durable credential persistence for the Hearth client.
//!
//! This crate provides the storage layer the session engine uses to keep the
//! bearer credential across restarts:
//! - A [`CredentialStorage`] trait so backends can be swapped in tests
//! - A file-backed implementation (`~/.hearth/credentials.json`, 0600)
//! - An in-memory implementation for tests and ephemeral sessions
//! - A high-level [`CredentialStore`] facade over any backend
//!
//! Exactly one durable key holds the bearer credential; nothing else about
//! the session is persisted.

mod file;
mod keys;
mod memory;
mod store;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use store::CredentialStore;
pub use traits::CredentialStorage;

use std::path::PathBuf;
use thiserror::Error;

/// Directory under the home directory holding client runtime files.
const BASE_DIR_NAME: &str = ".hearth";

/// Filename of the credential file inside the base directory.
const CREDENTIAL_FILE_NAME: &str = "credentials.json";

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific failure (unusable path, permission change, ...)
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Default location of the credential file (`~/.hearth/credentials.json`).
pub fn default_store_path() -> StorageResult<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| StorageError::Backend("Could not determine home directory".to_string()))?;
    Ok(home.join(BASE_DIR_NAME).join(CREDENTIAL_FILE_NAME))
}

/// Create a [`CredentialStore`] over the default file backend.
pub fn create_store() -> StorageResult<CredentialStore> {
    let path = default_store_path()?;
    let storage = FileStorage::new(path);
    Ok(CredentialStore::new(Box::new(storage)))
}
