//! High-level API over a storage backend.

use crate::{CredentialStorage, StorageKeys, StorageResult};

/// High-level facade for the persisted bearer credential.
///
/// Single-writer discipline: only the session manager writes through this
/// type, which keeps the persisted token free of lost-update races.
pub struct CredentialStore {
    storage: Box<dyn CredentialStorage>,
}

impl CredentialStore {
    /// Create a credential store with the given storage backend.
    pub fn new(storage: Box<dyn CredentialStorage>) -> Self {
        Self { storage }
    }

    /// Retrieve the persisted bearer credential.
    pub fn get_token(&self) -> StorageResult<Option<String>> {
        self.storage.get(StorageKeys::ACCESS_TOKEN)
    }

    /// Persist the bearer credential.
    pub fn set_token(&self, token: &str) -> StorageResult<()> {
        self.storage.set(StorageKeys::ACCESS_TOKEN, token)
    }

    /// Check whether a credential is persisted.
    pub fn has_token(&self) -> StorageResult<bool> {
        self.storage.has(StorageKeys::ACCESS_TOKEN)
    }

    /// Remove the persisted credential, if any.
    pub fn clear(&self) -> StorageResult<()> {
        let _ = self.storage.delete(StorageKeys::ACCESS_TOKEN)?;
        Ok(())
    }
}
