use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::services::store::{self, StoreError};

/// Persistent query → destination id table.
///
/// Entries are never invalidated; `clear` removes the file.
#[derive(Debug)]
pub struct LookupCache {
    path: Option<PathBuf>,
    entries: BTreeMap<String, String>,
    dirty: bool,
}

impl LookupCache {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            path: Some(path.to_path_buf()),
            entries: store::read_json(path)?,
            dirty: false,
        })
    }

    /// Open `path`, falling back to an in-memory cache when it cannot be read.
    pub fn open_or_empty(path: &Path) -> Self {
        Self::open(path).unwrap_or_else(|error| {
            tracing::warn!("Lookup cache unavailable, starting empty: {:#}", error);
            Self::in_memory()
        })
    }

    /// A cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
            dirty: false,
        }
    }

    pub fn get(&self, query: &str) -> Option<&str> {
        self.entries.get(query).map(String::as_str)
    }

    pub fn insert(&mut self, query: String, id: String) {
        if self.entries.get(&query) != Some(&id) {
            self.entries.insert(query, id);
            self.dirty = true;
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn save(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(path) = &self.path {
            store::write_json(path, &self.entries)?;
        }
        self.dirty = false;
        Ok(())
    }

    /// Delete the cache file at `path`. Returns whether a file was removed.
    pub fn clear(path: &Path) -> std::io::Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error),
        }
    }
}
