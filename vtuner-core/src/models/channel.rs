use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use super::attr::StreamAttr;
use super::id::{Fingerprint, PlaylistId};

/// One channel entry of an ingested playlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub name: String,
    pub url: String,
    /// Raw M3U attributes (`tvg-logo`, `group-title`, ...) plus ingest-derived
    /// fields such as `_duration`.
    pub attrs: BTreeMap<String, StreamAttr>,
}

impl ChannelEntry {
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            attrs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attr(mut self, key: &str, value: impl Into<StreamAttr>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&StreamAttr> {
        self.attrs.get(key)
    }

    #[must_use]
    pub fn group_title(&self) -> Option<&str> {
        self.attr("group-title").and_then(StreamAttr::as_str)
    }

    #[must_use]
    pub fn tvg_logo(&self) -> Option<&str> {
        self.attr("tvg-logo").and_then(StreamAttr::as_str)
    }

    /// Duration in seconds, when the ingest layer resolved one.
    #[must_use]
    pub fn duration_secs(&self) -> Option<f64> {
        self.attr("_duration").and_then(StreamAttr::as_f64)
    }

    /// Byte size advertised by the playlist, when present.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.attr("_size")
            .and_then(StreamAttr::as_i64)
            .and_then(|v| u64::try_from(v).ok())
    }
}

/// An ingested upstream provider: M3U or HDHR playlist plus its tuner limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistSource {
    pub id: PlaylistId,
    pub name: String,
    /// Stable key used in WebDAV paths and client counts.
    pub hash: String,
    /// Maximum concurrent distinct streams.
    pub tuner: u32,
    /// The ingested playlist file inside the data directory; exposed as
    /// `listing.m3u` over WebDAV.
    pub m3u_path: PathBuf,
    pub entries: Vec<ChannelEntry>,
}

impl PlaylistSource {
    #[must_use]
    pub fn new(id: PlaylistId, name: impl Into<String>, tuner: u32) -> Self {
        let hash = Fingerprint::of_url(id.as_str()).to_string();
        Self {
            id,
            name: name.into(),
            hash,
            tuner,
            m3u_path: PathBuf::new(),
            entries: Vec::new(),
        }
    }
}

/// Aggregate counts for the status surface.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CatalogCounts {
    pub streams_all: u64,
    pub streams_xepg: u64,
}

/// Read access to ingested playlist data and the generated output documents.
///
/// Ingestion, channel mapping and document generation happen outside this
/// workspace; the HTTP surface and the WebDAV view consume them through this
/// trait.
pub trait PlaylistCatalog: Send + Sync {
    fn sources(&self) -> Vec<Arc<PlaylistSource>>;

    fn source_by_hash(&self, hash: &str) -> Option<Arc<PlaylistSource>>;

    fn source_by_id(&self, id: &PlaylistId) -> Option<Arc<PlaylistSource>>;

    /// Generated unified M3U document, by output file name.
    fn m3u_document(&self, name: &str) -> Option<String>;

    /// Generated XMLTV document, by output file name.
    fn xmltv_document(&self, name: &str) -> Option<String>;

    /// Guide source label reported by the status command.
    fn epg_source(&self) -> String;

    fn counts(&self) -> CatalogCounts;
}

/// In-process catalog backing tests and the default wiring. The ingest jobs
/// replace whole sources; readers hold cheap `Arc` snapshots.
#[derive(Default)]
pub struct InMemoryCatalog {
    inner: RwLock<CatalogInner>,
}

#[derive(Default)]
struct CatalogInner {
    sources: Vec<Arc<PlaylistSource>>,
    by_hash: HashMap<String, Arc<PlaylistSource>>,
    m3u_documents: HashMap<String, String>,
    xmltv_documents: HashMap<String, String>,
    epg_source: String,
    counts: CatalogCounts,
}

impl InMemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_source(&self, source: PlaylistSource) {
        let source = Arc::new(source);
        let mut inner = self.inner.write();
        inner.sources.retain(|s| s.id != source.id);
        inner.by_hash.insert(source.hash.clone(), source.clone());
        inner.sources.push(source);
        inner.counts.streams_all = inner
            .sources
            .iter()
            .map(|s| s.entries.len() as u64)
            .sum();
    }

    pub fn set_m3u_document(&self, name: &str, body: String) {
        self.inner.write().m3u_documents.insert(name.to_string(), body);
    }

    pub fn set_xmltv_document(&self, name: &str, body: String) {
        self.inner
            .write()
            .xmltv_documents
            .insert(name.to_string(), body);
    }

    pub fn set_epg_source(&self, source: &str) {
        self.inner.write().epg_source = source.to_string();
    }

    pub fn set_mapped_count(&self, streams_xepg: u64) {
        self.inner.write().counts.streams_xepg = streams_xepg;
    }
}

impl PlaylistCatalog for InMemoryCatalog {
    fn sources(&self) -> Vec<Arc<PlaylistSource>> {
        self.inner.read().sources.clone()
    }

    fn source_by_hash(&self, hash: &str) -> Option<Arc<PlaylistSource>> {
        self.inner.read().by_hash.get(hash).cloned()
    }

    fn source_by_id(&self, id: &PlaylistId) -> Option<Arc<PlaylistSource>> {
        self.inner
            .read()
            .sources
            .iter()
            .find(|s| &s.id == id)
            .cloned()
    }

    fn m3u_document(&self, name: &str) -> Option<String> {
        self.inner.read().m3u_documents.get(name).cloned()
    }

    fn xmltv_document(&self, name: &str) -> Option<String> {
        self.inner.read().xmltv_documents.get(name).cloned()
    }

    fn epg_source(&self) -> String {
        self.inner.read().epg_source.clone()
    }

    fn counts(&self) -> CatalogCounts {
        self.inner.read().counts
    }
}
