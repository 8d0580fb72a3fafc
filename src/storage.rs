//! Storage for pairing credentials
//!
//! The credential string is opaque here; pairing produces it and
//! connecting consumes it. Keyed by device identifier.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store file is not valid JSON.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Abstract storage interface for credential strings
pub trait CredentialStorage: Send + Sync {
    /// Load the credential string for a device
    fn load(&self, device_id: &str) -> Option<String>;

    /// Save the credential string for a device
    ///
    /// # Errors
    ///
    /// Returns error if storage fails
    fn save(&mut self, device_id: &str, credentials: &str) -> Result<(), StorageError>;

    /// Remove the credentials for a device
    ///
    /// # Errors
    ///
    /// Returns error if removal fails
    fn remove(&mut self, device_id: &str) -> Result<(), StorageError>;

    /// List all stored device IDs
    fn list_devices(&self) -> Vec<String>;
}

/// In-memory credential storage (non-persistent)
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: HashMap<String, String>,
}

impl MemoryStorage {
    /// Create a new in-memory storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStorage for MemoryStorage {
    fn load(&self, device_id: &str) -> Option<String> {
        self.entries.get(device_id).cloned()
    }

    fn save(&mut self, device_id: &str, credentials: &str) -> Result<(), StorageError> {
        self.entries
            .insert(device_id.to_string(), credentials.to_string());
        Ok(())
    }

    fn remove(&mut self, device_id: &str) -> Result<(), StorageError> {
        self.entries.remove(device_id);
        Ok(())
    }

    fn list_devices(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// JSON-file-backed credential storage
pub struct FileStorage {
    path: std::path::PathBuf,
    cache: StoreFile,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    devices: HashMap<String, String>,
}

impl FileStorage {
    /// Open (or create) a store at the given path
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created or the file is
    /// unreadable
    pub fn new(path: impl AsRef<std::path::Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let cache = if path.exists() {
            let file = std::fs::File::open(&path)?;
            serde_json::from_reader(std::io::BufReader::new(file))
                .map_err(|e| StorageError::Serialization(e.to_string()))?
        } else {
            StoreFile::default()
        };

        Ok(Self { path, cache })
    }

    fn persist(&self) -> Result<(), StorageError> {
        let file = std::fs::File::create(&self.path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &self.cache)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

impl CredentialStorage for FileStorage {
    fn load(&self, device_id: &str) -> Option<String> {
        self.cache.devices.get(device_id).cloned()
    }

    fn save(&mut self, device_id: &str, credentials: &str) -> Result<(), StorageError> {
        self.cache
            .devices
            .insert(device_id.to_string(), credentials.to_string());
        self.persist()
    }

    fn remove(&mut self, device_id: &str) -> Result<(), StorageError> {
        self.cache.devices.remove(device_id);
        self.persist()
    }

    fn list_devices(&self) -> Vec<String> {
        self.cache.devices.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_roundtrip() {
        let mut storage = MemoryStorage::new();
        assert!(storage.load("atv").is_none());

        storage.save("atv", "aa:bb:cc:dd").unwrap();
        assert_eq!(storage.load("atv").as_deref(), Some("aa:bb:cc:dd"));
        assert_eq!(storage.list_devices(), vec!["atv".to_string()]);

        storage.remove("atv").unwrap();
        assert!(storage.load("atv").is_none());
    }

    #[test]
    fn test_file_storage_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        {
            let mut storage = FileStorage::new(&path).unwrap();
            storage.save("kitchen", "11:22:33:44").unwrap();
        }

        let storage = FileStorage::new(&path).unwrap();
        assert_eq!(storage.load("kitchen").as_deref(), Some("11:22:33:44"));
    }

    #[test]
    fn test_file_storage_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, b"not json").unwrap();

        assert!(matches!(
            FileStorage::new(&path),
            Err(StorageError::Serialization(_))
        ));
    }
}
