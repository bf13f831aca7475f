//! Key storage collaborators.
//!
//! The authority only ever stores, retrieves and deletes named byte strings
//! inside one service namespace. Two implementations ship with the crate: an
//! in-memory store for tests and ephemeral runs, and a file-backed store that
//! keeps one hex-encoded file per key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("Failed to store key {name}: {reason}")]
    StoreFailed { name: String, reason: String },

    #[error("Failed to retrieve key {name}: {reason}")]
    RetrieveFailed { name: String, reason: String },

    #[error("Failed to delete key {name}: {reason}")]
    DeleteFailed { name: String, reason: String },
}

/// Secure persistent storage for key material.
pub trait KeyStore: Send + Sync {
    /// Service namespace the keys live under.
    fn service(&self) -> &str;

    fn store(&self, name: &str, value: &[u8]) -> Result<(), KeyStoreError>;

    fn retrieve(&self, name: &str) -> Result<Option<Vec<u8>>, KeyStoreError>;

    /// Deleting a missing key is not an error.
    fn delete(&self, name: &str) -> Result<(), KeyStoreError>;
}

/// Volatile key store.
pub struct MemoryKeyStore {
    service: String,
    keys: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            keys: RwLock::new(HashMap::new()),
        }
    }
}

impl KeyStore for MemoryKeyStore {
    fn service(&self) -> &str {
        &self.service
    }

    fn store(&self, name: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        let mut keys = self.keys.write().map_err(|e| KeyStoreError::StoreFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        keys.insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn retrieve(&self, name: &str) -> Result<Option<Vec<u8>>, KeyStoreError> {
        let keys = self.keys.read().map_err(|e| KeyStoreError::RetrieveFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(keys.get(name).cloned())
    }

    fn delete(&self, name: &str) -> Result<(), KeyStoreError> {
        let mut keys = self.keys.write().map_err(|e| KeyStoreError::DeleteFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        keys.remove(name);
        Ok(())
    }
}

/// Key store persisting each key as `<root>/<service>/<name>.key` (hex).
pub struct FileKeyStore {
    service: String,
    dir: PathBuf,
}

impl FileKeyStore {
    pub fn open(root: impl AsRef<Path>, service: impl Into<String>) -> Result<Self, KeyStoreError> {
        let service = service.into();
        let dir = root.as_ref().join(&service);
        std::fs::create_dir_all(&dir).map_err(|e| KeyStoreError::StoreFailed {
            name: service.clone(),
            reason: format!("Failed to create key directory {}: {}", dir.display(), e),
        })?;

        info!("Opened key store at {}", dir.display());
        Ok(Self { service, dir })
    }

    fn key_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.key", name))
    }
}

impl KeyStore for FileKeyStore {
    fn service(&self) -> &str {
        &self.service
    }

    fn store(&self, name: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        let path = self.key_path(name);
        let fail = |reason: String| KeyStoreError::StoreFailed {
            name: name.to_string(),
            reason,
        };

        let tmp = path.with_extension("key.tmp");
        std::fs::write(&tmp, hex::encode(value)).map_err(|e| fail(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| fail(e.to_string()))?;
        }

        std::fs::rename(&tmp, &path).map_err(|e| fail(e.to_string()))?;
        debug!("Stored key {} in {}", name, self.service);
        Ok(())
    }

    fn retrieve(&self, name: &str) -> Result<Option<Vec<u8>>, KeyStoreError> {
        let raw = match std::fs::read_to_string(self.key_path(name)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KeyStoreError::RetrieveFailed {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        hex::decode(raw.trim())
            .map(Some)
            .map_err(|e| KeyStoreError::RetrieveFailed {
                name: name.to_string(),
                reason: format!("Corrupt key encoding: {}", e),
            })
    }

    fn delete(&self, name: &str) -> Result<(), KeyStoreError> {
        match std::fs::remove_file(self.key_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeyStoreError::DeleteFailed {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
