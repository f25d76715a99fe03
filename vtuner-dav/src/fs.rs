//! Read-only WebDAV filesystem
//!
//! Maps the derived on-demand hierarchy onto `dav-server`'s filesystem
//! traits. Every mutating operation answers `Forbidden`, which the protocol
//! layer turns into a 403.

use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsResult, FsStream,
    OpenOptions, ReadDirMeta,
};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use vtuner_core::models::{PlaylistCatalog, PlaylistSource};
use vtuner_core::Fetcher;

use crate::cache::{FileMeta, WebDavCache};
use crate::content_cache::ContentCache;
use crate::file::{MemFile, StreamingFile};
use crate::tree::{DerivedTree, FileStreamInfo};

const ON_DEMAND: &str = "On Demand";
const LISTING: &str = "listing.m3u";
const INDIVIDUAL: &str = "Individual";
const SERIES: &str = "Series";

/// Metadata for both directories and files in the virtual tree.
#[derive(Debug, Clone)]
pub struct VodMeta {
    len: u64,
    modified: SystemTime,
    dir: bool,
}

impl VodMeta {
    #[must_use]
    pub fn dir(modified: SystemTime) -> Self {
        Self {
            len: 0,
            modified,
            dir: true,
        }
    }

    #[must_use]
    pub fn file(meta: &FileMeta) -> Self {
        Self {
            len: meta.size,
            modified: meta.modified(),
            dir: false,
        }
    }

    #[must_use]
    pub fn sized(len: u64, modified: SystemTime) -> Self {
        Self {
            len,
            modified,
            dir: false,
        }
    }
}

impl DavMetaData for VodMeta {
    fn len(&self) -> u64 {
        self.len
    }

    fn modified(&self) -> FsResult<SystemTime> {
        Ok(self.modified)
    }

    fn is_dir(&self) -> bool {
        self.dir
    }
}

/// One resolved path inside the virtual tree.
enum Node {
    Root,
    HashRoot(Arc<PlaylistSource>),
    Listing(Arc<PlaylistSource>),
    OnDemand(Arc<DerivedTree>),
    Group(Arc<DerivedTree>, String),
    IndividualDir(Arc<DerivedTree>, String),
    SeriesRoot(Arc<DerivedTree>, String),
    SeriesDir(Arc<DerivedTree>, String, String),
    SeasonDir(Arc<DerivedTree>, String, String, u32),
    File {
        file: FileStreamInfo,
        playlist_mtime: Option<SystemTime>,
    },
}

#[derive(Clone)]
pub struct VodFs {
    inner: Arc<VodFsInner>,
}

struct VodFsInner {
    catalog: Arc<dyn PlaylistCatalog>,
    cache: Arc<WebDavCache>,
    content_cache: Arc<ContentCache>,
    fetcher: Arc<Fetcher>,
}

impl VodFs {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn PlaylistCatalog>,
        cache: Arc<WebDavCache>,
        content_cache: Arc<ContentCache>,
        fetcher: Arc<Fetcher>,
    ) -> Self {
        Self {
            inner: Arc::new(VodFsInner {
                catalog,
                cache,
                content_cache,
                fetcher,
            }),
        }
    }

    fn components(path: &DavPath) -> Vec<String> {
        path.as_rel_ospath()
            .components()
            .filter_map(|c| c.as_os_str().to_str().map(str::to_string))
            .collect()
    }

    fn resolve(&self, path: &DavPath) -> FsResult<Node> {
        let parts = Self::components(path);
        if parts.is_empty() {
            return Ok(Node::Root);
        }

        let source = self
            .inner
            .catalog
            .source_by_hash(&parts[0])
            .ok_or(FsError::NotFound)?;
        if parts.len() == 1 {
            return Ok(Node::HashRoot(source));
        }

        if parts[1] == LISTING {
            return if parts.len() == 2 {
                Ok(Node::Listing(source))
            } else {
                Err(FsError::NotFound)
            };
        }
        if parts[1] != ON_DEMAND {
            return Err(FsError::NotFound);
        }
        let tree = self.inner.cache.tree(&source.hash).ok_or(FsError::NotFound)?;
        if parts.len() == 2 {
            return Ok(Node::OnDemand(tree));
        }

        let group = parts[2].clone();
        if !tree.groups.contains(&group) {
            return Err(FsError::NotFound);
        }
        if parts.len() == 3 {
            return Ok(Node::Group(tree, group));
        }

        let playlist_mtime = playlist_mtime(&source);
        match parts[3].as_str() {
            INDIVIDUAL => match parts.len() {
                4 => Ok(Node::IndividualDir(tree, group)),
                5 => {
                    let file = tree
                        .individual_file(&group, &parts[4])
                        .cloned()
                        .ok_or(FsError::NotFound)?;
                    Ok(Node::File {
                        file,
                        playlist_mtime,
                    })
                }
                _ => Err(FsError::NotFound),
            },
            SERIES => match parts.len() {
                4 => Ok(Node::SeriesRoot(tree, group)),
                5 | 6 | 7 => {
                    let series = parts[4].clone();
                    let known = tree
                        .series
                        .get(&group)
                        .is_some_and(|list| list.contains(&series));
                    if !known {
                        return Err(FsError::NotFound);
                    }
                    if parts.len() == 5 {
                        return Ok(Node::SeriesDir(tree, group, series));
                    }
                    let season = parts[5]
                        .strip_prefix("Season ")
                        .and_then(|n| n.parse::<u32>().ok())
                        .ok_or(FsError::NotFound)?;
                    let has_season = tree
                        .seasons
                        .get(&(group.clone(), series.clone()))
                        .is_some_and(|list| list.contains(&season));
                    if !has_season {
                        return Err(FsError::NotFound);
                    }
                    if parts.len() == 6 {
                        return Ok(Node::SeasonDir(tree, group, series, season));
                    }
                    let file = tree
                        .season_file(&group, &series, season, &parts[6])
                        .cloned()
                        .ok_or(FsError::NotFound)?;
                    Ok(Node::File {
                        file,
                        playlist_mtime,
                    })
                }
                _ => Err(FsError::NotFound),
            },
            _ => Err(FsError::NotFound),
        }
    }

    fn dir_entries(&self, node: &Node) -> FsResult<Vec<VodDirEntry>> {
        let inner = &self.inner;
        let now_dir = |name: String, modified: SystemTime| VodDirEntry {
            name,
            kind: EntryKind::Dir { modified },
        };

        Ok(match node {
            Node::Root => inner
                .catalog
                .sources()
                .into_iter()
                .map(|s| now_dir(s.hash.clone(), playlist_mtime(&s).unwrap_or(SystemTime::UNIX_EPOCH)))
                .collect(),
            Node::HashRoot(source) => {
                let mtime = playlist_mtime(source).unwrap_or(SystemTime::UNIX_EPOCH);
                vec![
                    VodDirEntry {
                        name: LISTING.to_string(),
                        kind: EntryKind::Local {
                            path: source.m3u_path.clone(),
                        },
                    },
                    now_dir(ON_DEMAND.to_string(), mtime),
                ]
            }
            Node::OnDemand(tree) => tree
                .groups
                .iter()
                .map(|g| now_dir(g.clone(), SystemTime::UNIX_EPOCH))
                .collect(),
            Node::Group(..) => vec![
                now_dir(INDIVIDUAL.to_string(), SystemTime::UNIX_EPOCH),
                now_dir(SERIES.to_string(), SystemTime::UNIX_EPOCH),
            ],
            Node::IndividualDir(tree, group) => file_entries(
                inner,
                tree.individual.get(group).map_or(&[][..], Vec::as_slice),
            ),
            Node::SeriesRoot(tree, group) => tree
                .series
                .get(group)
                .map_or(&[][..], Vec::as_slice)
                .iter()
                .map(|s| now_dir(s.clone(), SystemTime::UNIX_EPOCH))
                .collect(),
            Node::SeriesDir(tree, group, series) => tree
                .seasons
                .get(&(group.clone(), series.clone()))
                .map_or(&[][..], Vec::as_slice)
                .iter()
                .map(|n| now_dir(DerivedTree::season_dir_name(*n), SystemTime::UNIX_EPOCH))
                .collect(),
            Node::SeasonDir(tree, group, series, season) => file_entries(
                inner,
                tree.season_files
                    .get(&(group.clone(), series.clone(), *season))
                    .map_or(&[][..], Vec::as_slice),
            ),
            Node::Listing(_) | Node::File { .. } => return Err(FsError::NotFound),
        })
    }
}

fn playlist_mtime(source: &PlaylistSource) -> Option<SystemTime> {
    std::fs::metadata(&source.m3u_path)
        .ok()
        .and_then(|m| m.modified().ok())
}

fn file_entries(inner: &Arc<VodFsInner>, files: &[FileStreamInfo]) -> Vec<VodDirEntry> {
    files
        .iter()
        .map(|f| VodDirEntry {
            name: f.name.clone(),
            kind: EntryKind::File {
                cache: inner.cache.clone(),
                file: f.clone(),
            },
        })
        .collect()
}

enum EntryKind {
    Dir { modified: SystemTime },
    File { cache: Arc<WebDavCache>, file: FileStreamInfo },
    Local { path: PathBuf },
}

struct VodDirEntry {
    name: String,
    kind: EntryKind,
}

impl DavDirEntry for VodDirEntry {
    fn name(&self) -> Vec<u8> {
        self.name.clone().into_bytes()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        Box::pin(async move {
            match &self.kind {
                EntryKind::Dir { modified } => {
                    Ok(Box::new(VodMeta::dir(*modified)) as Box<dyn DavMetaData>)
                }
                EntryKind::File { cache, file } => {
                    let meta = cache.resolve_meta(file, None).await;
                    Ok(Box::new(VodMeta::file(&meta)) as Box<dyn DavMetaData>)
                }
                EntryKind::Local { path } => {
                    let meta = tokio::fs::metadata(path)
                        .await
                        .map_err(|_| FsError::NotFound)?;
                    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    Ok(Box::new(VodMeta::sized(meta.len(), modified)) as Box<dyn DavMetaData>)
                }
            }
        })
    }
}

impl DavFileSystem for VodFs {
    fn open<'a>(
        &'a self,
        path: &'a DavPath,
        options: OpenOptions,
    ) -> FsFuture<'a, Box<dyn DavFile>> {
        Box::pin(async move {
            if options.write || options.append || options.truncate || options.create_new {
                return Err(FsError::Forbidden);
            }
            match self.resolve(path)? {
                Node::Listing(source) => {
                    let data = tokio::fs::read(&source.m3u_path)
                        .await
                        .map_err(|_| FsError::NotFound)?;
                    let modified = playlist_mtime(&source).unwrap_or(SystemTime::UNIX_EPOCH);
                    let meta = VodMeta::sized(data.len() as u64, modified);
                    Ok(Box::new(MemFile::new(data.into(), meta)) as Box<dyn DavFile>)
                }
                Node::File {
                    file,
                    playlist_mtime,
                } => {
                    let meta = self.inner.cache.resolve_meta(&file, playlist_mtime).await;
                    Ok(Box::new(StreamingFile::new(
                        self.inner.fetcher.clone(),
                        self.inner.content_cache.clone(),
                        file.target_url,
                        meta,
                    )) as Box<dyn DavFile>)
                }
                _ => Err(FsError::NotFound),
            }
        })
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        _meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        Box::pin(async move {
            let node = self.resolve(path)?;

            // Resolve file metadata for the whole directory in one bounded
            // parallel sweep; the per-entry lookups then hit the cache.
            match &node {
                Node::IndividualDir(tree, group) => {
                    if let Some(files) = tree.individual.get(group) {
                        self.inner.cache.prefetch_metadata(files, None).await;
                    }
                }
                Node::SeasonDir(tree, group, series, season) => {
                    if let Some(files) =
                        tree.season_files
                            .get(&(group.clone(), series.clone(), *season))
                    {
                        self.inner.cache.prefetch_metadata(files, None).await;
                    }
                }
                _ => {}
            }

            let entries = self.dir_entries(&node)?;
            let stream = futures::stream::iter(
                entries
                    .into_iter()
                    .map(|e| Ok(Box::new(e) as Box<dyn DavDirEntry>)),
            )
            .boxed();
            Ok(stream as FsStream<Box<dyn DavDirEntry>>)
        })
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            match self.resolve(path)? {
                Node::File {
                    file,
                    playlist_mtime,
                } => {
                    let meta = self.inner.cache.resolve_meta(&file, playlist_mtime).await;
                    Ok(Box::new(VodMeta::file(&meta)) as Box<dyn DavMetaData>)
                }
                Node::Listing(source) => {
                    let meta = tokio::fs::metadata(&source.m3u_path)
                        .await
                        .map_err(|_| FsError::NotFound)?;
                    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    Ok(Box::new(VodMeta::sized(meta.len(), modified)) as Box<dyn DavMetaData>)
                }
                Node::HashRoot(source) => {
                    let modified = playlist_mtime(&source).unwrap_or(SystemTime::UNIX_EPOCH);
                    Ok(Box::new(VodMeta::dir(modified)) as Box<dyn DavMetaData>)
                }
                _ => Ok(Box::new(VodMeta::dir(SystemTime::UNIX_EPOCH)) as Box<dyn DavMetaData>),
            }
        })
    }

    fn create_dir<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn remove_dir<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn remove_file<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn rename<'a>(&'a self, _from: &'a DavPath, _to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn copy<'a>(&'a self, _from: &'a DavPath, _to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtuner_core::config::FetchConfig;
    use vtuner_core::models::{ChannelEntry, InMemoryCatalog, PlaylistId};
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn build_fs(upstream: &str) -> (VodFs, String) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let mut source = PlaylistSource::new(PlaylistId::from("M3U-1"), "Provider", 1);
        source.entries.push(
            ChannelEntry::new("My Series S01 E01", format!("{upstream}/ep.mp4"))
                .with_attr("group-title", "G"),
        );
        source.entries.push(
            ChannelEntry::new("Lonely Movie", format!("{upstream}/movie.mp4"))
                .with_attr("group-title", "G"),
        );
        let hash = source.hash.clone();
        catalog.upsert_source(source);

        let fetcher = Arc::new(
            Fetcher::new(&FetchConfig {
                allow_loopback: true,
                ..FetchConfig::default()
            })
            .expect("fetcher"),
        );
        let cache = Arc::new(WebDavCache::new(catalog.clone(), fetcher.clone(), 4));
        let content_cache = Arc::new(ContentCache::new(1024, 8 * 1024));
        (VodFs::new(catalog, cache, content_cache, fetcher), hash)
    }

    fn dav_path(raw: &str) -> DavPath {
        DavPath::new(&raw.replace(' ', "%20")).expect("dav path")
    }

    #[tokio::test]
    async fn test_series_file_stat_resolves_size() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(url_path("/ep.mp4"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "123456"))
            .mount(&server)
            .await;

        let (fs, hash) = build_fs(&server.uri());
        let path = dav_path(&format!(
            "/{hash}/On Demand/G/Series/My Series/Season 1/My_Series_S01_E01.mp4"
        ));
        let meta = fs.metadata(&path).await.expect("metadata");
        assert!(!meta.is_dir());
        assert_eq!(meta.len(), 123_456);
    }

    #[tokio::test]
    async fn test_directory_nodes_resolve() {
        let server = MockServer::start().await;
        let (fs, hash) = build_fs(&server.uri());

        for dir in [
            format!("/{hash}"),
            format!("/{hash}/On Demand"),
            format!("/{hash}/On Demand/G"),
            format!("/{hash}/On Demand/G/Individual"),
            format!("/{hash}/On Demand/G/Series"),
            format!("/{hash}/On Demand/G/Series/My Series"),
            format!("/{hash}/On Demand/G/Series/My Series/Season 1"),
        ] {
            let meta = fs.metadata(&dav_path(&dir)).await.expect("metadata");
            assert!(meta.is_dir(), "{dir} should be a directory");
        }

        let missing = fs
            .metadata(&dav_path(&format!("/{hash}/On Demand/Nope")))
            .await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_read_dir_listings() {
        let server = MockServer::start().await;
        // Directory listings resolve file sizes through HEAD, once per URL.
        for file in ["ep.mp4", "movie.mp4"] {
            Mock::given(method("HEAD"))
                .and(url_path(format!("/{file}")))
                .respond_with(ResponseTemplate::new(200).insert_header("content-length", "10"))
                .expect(0..=1_u64)
                .mount(&server)
                .await;
        }
        let (fs, hash) = build_fs(&server.uri());

        let names = |entries: Vec<FsResult<Box<dyn DavDirEntry>>>| {
            entries
                .iter()
                .map(|e| {
                    String::from_utf8_lossy(&e.as_ref().expect("entry").name()).into_owned()
                })
                .collect::<Vec<_>>()
        };

        let root = fs
            .read_dir(&dav_path(&format!("/{hash}")), ReadDirMeta::Data)
            .await
            .expect("read_dir")
            .collect::<Vec<_>>()
            .await;
        assert_eq!(names(root), vec!["listing.m3u", "On Demand"]);

        let groups = fs
            .read_dir(&dav_path(&format!("/{hash}/On Demand")), ReadDirMeta::Data)
            .await
            .expect("read_dir")
            .collect::<Vec<_>>()
            .await;
        assert_eq!(names(groups), vec!["G"]);

        let individual = fs
            .read_dir(
                &dav_path(&format!("/{hash}/On Demand/G/Individual")),
                ReadDirMeta::Data,
            )
            .await
            .expect("read_dir")
            .collect::<Vec<_>>()
            .await;
        assert_eq!(names(individual), vec!["Lonely_Movie.mp4"]);
    }

    #[tokio::test]
    async fn test_mutations_forbidden() {
        let server = MockServer::start().await;
        let (fs, hash) = build_fs(&server.uri());
        let path = dav_path(&format!("/{hash}/On Demand/G/Individual/New.mp4"));

        assert!(matches!(
            fs.create_dir(&path).await,
            Err(FsError::Forbidden)
        ));
        assert!(matches!(
            fs.remove_file(&path).await,
            Err(FsError::Forbidden)
        ));

        let mut options = OpenOptions::default();
        options.write = true;
        options.create = true;
        assert!(matches!(
            fs.open(&path, options).await.map(|_| ()),
            Err(FsError::Forbidden)
        ));
    }
}
