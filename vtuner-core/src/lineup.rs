//! Stream lineup
//!
//! Sidecar table mapping opaque stream keys (the `<key>` in `/stream/<key>`)
//! to upstream URLs and guide metadata. Persisted as JSON inside the data
//! directory and also the backing store for the HDHR `lineup.json` document.

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::models::PlaylistId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineupEntry {
    pub guide_number: String,
    pub guide_name: String,
    pub url: String,
    pub playlist_id: PlaylistId,
    pub playlist_name: String,
    pub channel_name: String,
}

pub struct LineupTable {
    path: PathBuf,
    entries: RwLock<IndexMap<String, LineupEntry>>,
}

impl LineupTable {
    /// Load the table from `path`; a missing file yields an empty table.
    pub fn load(path: PathBuf) -> Result<Self> {
        let entries = match std::fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)
                .map_err(|e| Error::Config(format!("lineup table {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            entries: RwLock::new(IndexMap::new()),
        }
    }

    pub fn save(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(&*self.entries.read())?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }

    #[must_use]
    pub fn resolve(&self, key: &str) -> Option<LineupEntry> {
        self.entries.read().get(key).cloned()
    }

    pub fn upsert(&self, key: String, entry: LineupEntry) {
        self.entries.write().insert(key, entry);
    }

    pub fn remove(&self, key: &str) -> Option<LineupEntry> {
        self.entries.write().shift_remove(key)
    }

    /// Ordered snapshot for lineup documents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, LineupEntry)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
