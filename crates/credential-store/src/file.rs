//! File-backed credential storage.

use crate::{CredentialStorage, StorageError, StorageResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

/// Storage backend persisting entries as a small JSON object on disk.
///
/// Every operation reads the file fresh and writes it back under a lock, so
/// a single writer never loses an update to its own earlier write. The file
/// is created with owner-only permissions on unix.
pub struct FileStorage {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileStorage {
    /// Create a file storage rooted at the given path.
    ///
    /// The file and its parent directory are created lazily on first write.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn read_entries(&self) -> StorageResult<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&content).map_err(|e| StorageError::Encoding(e.to_string()))
    }

    fn write_entries(&self, entries: &HashMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        std::fs::write(&self.path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(err) = std::fs::set_permissions(&self.path, permissions) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Failed to tighten permissions on credential file"
                );
            }
        }

        Ok(())
    }
}

impl CredentialStorage for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let mut entries = self.read_entries()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_entries(&entries)?;
        debug!(key = %key, path = %self.path.display(), "Stored credential entry");
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        Ok(self.read_entries()?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let mut entries = self.read_entries()?;
        let existed = entries.remove(key).is_some();
        if existed {
            self.write_entries(&entries)?;
            debug!(key = %key, "Deleted credential entry");
        }
        Ok(existed)
    }
}

fn poisoned() -> StorageError {
    StorageError::Backend("storage lock poisoned".to_string())
}
