//! Layered WebDAV caches
//!
//! Layer 1: derived directory trees per playlist hash, invalidated explicitly
//! when a playlist is re-ingested. Layer 2: per-URL file metadata (size,
//! mtime) resolved through a priority chain ending in a remote HEAD, with
//! misses fetched in bounded parallel batches.

use futures::stream::StreamExt;
use moka::sync::Cache;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

use vtuner_core::models::PlaylistCatalog;
use vtuner_core::Fetcher;

use crate::tree::{derive_tree, DerivedTree, FileStreamInfo};

/// Resolved file metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    /// Upstream modification time, when one is known.
    pub mod_time: Option<SystemTime>,
    /// When this entry was resolved; doubles as the mtime fallback.
    pub cached_at: SystemTime,
}

impl FileMeta {
    /// Best available modification time.
    #[must_use]
    pub fn modified(&self) -> SystemTime {
        self.mod_time.unwrap_or(self.cached_at)
    }
}

pub struct WebDavCache {
    catalog: Arc<dyn PlaylistCatalog>,
    fetcher: Arc<Fetcher>,
    head_concurrency: usize,
    trees: RwLock<HashMap<String, Arc<DerivedTree>>>,
    metadata: Cache<String, FileMeta>,
}

impl WebDavCache {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn PlaylistCatalog>,
        fetcher: Arc<Fetcher>,
        head_concurrency: usize,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            head_concurrency: head_concurrency.max(1),
            trees: RwLock::new(HashMap::new()),
            metadata: Cache::new(100_000),
        }
    }

    /// Derived tree for a playlist hash, built lazily on first access.
    #[must_use]
    pub fn tree(&self, hash: &str) -> Option<Arc<DerivedTree>> {
        if let Some(tree) = self.trees.read().get(hash) {
            return Some(tree.clone());
        }
        let source = self.catalog.source_by_hash(hash)?;
        let tree = Arc::new(derive_tree(&source));
        self.trees
            .write()
            .entry(hash.to_string())
            .or_insert_with(|| tree.clone());
        Some(tree)
    }

    /// Invalidate one playlist's tree, or every tree.
    pub fn clear(&self, hash: Option<&str>) {
        match hash {
            Some(hash) => {
                self.trees.write().remove(hash);
            }
            None => self.trees.write().clear(),
        }
    }

    /// Resolve metadata for one synthesized file. Priority: a stored entry
    /// with a real mtime, then playlist attributes, then the cached HEAD
    /// result, then a live HEAD, with `cached_at` and finally the playlist
    /// file's own mtime as mtime fallbacks.
    pub async fn resolve_meta(
        &self,
        file: &FileStreamInfo,
        playlist_mtime: Option<SystemTime>,
    ) -> FileMeta {
        if let Some(stored) = self.metadata.get(&file.target_url) {
            if stored.mod_time.is_some() {
                return stored;
            }
        }

        if let Some(size) = file.entry.content_length() {
            let mod_time = file
                .entry
                .attr("_mtime")
                .and_then(vtuner_core::models::StreamAttr::as_i64)
                .and_then(|secs| {
                    SystemTime::UNIX_EPOCH.checked_add(std::time::Duration::from_secs(
                        u64::try_from(secs).ok()?,
                    ))
                })
                .or(playlist_mtime);
            let meta = FileMeta {
                size,
                mod_time,
                cached_at: SystemTime::now(),
            };
            self.metadata.insert(file.target_url.clone(), meta);
            return meta;
        }

        if let Some(stored) = self.metadata.get(&file.target_url) {
            return stored;
        }

        let meta = self.head_meta(&file.target_url, playlist_mtime).await;
        self.metadata.insert(file.target_url.clone(), meta);
        meta
    }

    /// Resolve misses for a whole directory in one bounded parallel sweep.
    pub async fn prefetch_metadata(
        &self,
        files: &[FileStreamInfo],
        playlist_mtime: Option<SystemTime>,
    ) {
        let missing: Vec<&FileStreamInfo> = files
            .iter()
            .filter(|f| self.metadata.get(&f.target_url).is_none())
            .collect();
        if missing.is_empty() {
            return;
        }
        debug!(count = missing.len(), "resolving file metadata via HEAD");
        futures::stream::iter(missing)
            .for_each_concurrent(self.head_concurrency, |file| async move {
                let _ = self.resolve_meta(file, playlist_mtime).await;
            })
            .await;
    }

    async fn head_meta(&self, url: &str, playlist_mtime: Option<SystemTime>) -> FileMeta {
        let now = SystemTime::now();
        match self.fetcher.head(url).await {
            Ok(response) if response.status().is_success() => {
                let size = response
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let mod_time = response
                    .headers()
                    .get(reqwest::header::LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| chrono::DateTime::parse_from_rfc2822(v).ok())
                    .map(SystemTime::from)
                    .or(playlist_mtime);
                FileMeta {
                    size,
                    mod_time,
                    cached_at: now,
                }
            }
            _ => FileMeta {
                size: 0,
                mod_time: playlist_mtime,
                cached_at: now,
            },
        }
    }
}
