//! Snapshot persistence for the directive collection.

use std::path::{Path, PathBuf};
use tracing::debug;

use super::types::Directive;
use crate::error::{BarkError, Result};

/// Writes the whole collection as one JSON array, replacing the previous
/// snapshot atomically via a temporary file and rename.
#[derive(Debug, Clone)]
pub struct DirectiveStore {
    path: PathBuf,
}

impl DirectiveStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<Directive>> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BarkError::StorageError(format!(
                    "Failed to read directive store {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let directives: Vec<Directive> = serde_json::from_slice(&raw)?;
        debug!("Loaded {} directives from {}", directives.len(), self.path.display());
        Ok(directives)
    }

    pub fn save<'a>(&self, directives: impl Iterator<Item = &'a Directive>) -> Result<()> {
        let mut snapshot: Vec<&Directive> = directives.collect();
        snapshot.sort_by_key(|d| (d.timestamp, d.id));

        let json = serde_json::to_vec_pretty(&snapshot)?;
        let fail = |e: std::io::Error| {
            BarkError::StorageError(format!(
                "Failed to write directive store {}: {}",
                self.path.display(),
                e
            ))
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(fail)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(fail)?;
        std::fs::rename(&tmp, &self.path).map_err(fail)?;
        Ok(())
    }
}
