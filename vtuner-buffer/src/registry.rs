//! Tuner registry
//!
//! Process-wide bookkeeping for buffered streams: which playlists have active
//! streams, how many HTTP clients are attached to each, and the shared
//! segment log the producer feeds and consumers drain. Everything is guarded
//! by a single mutex with strictly bounded critical sections; segment I/O
//! never happens under the lock.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use vtuner_core::models::{Fingerprint, PlaylistId, StreamId};
use vtuner_core::Error;

/// Number of already-sent segments kept behind the slowest consumer before
/// the oldest is evicted from the virtual filesystem.
pub const RETIRE_WINDOW: usize = 20;

/// One pending HLS media fetch.
#[derive(Debug, Clone)]
pub struct HlsSegment {
    pub url: String,
    pub duration: f64,
    pub sequence: u64,
}

/// Mutable state of one buffered upstream stream.
pub struct StreamState {
    pub id: StreamId,
    pub url: String,
    pub channel_name: String,
    pub playlist_id: PlaylistId,
    pub playlist_name: String,
    pub fingerprint: Fingerprint,
    /// Segment folder inside the virtual filesystem.
    pub folder: PathBuf,
    /// First segment is available; consumers block until this flips.
    pub started: bool,
    /// Producer observed EOF (TS) or drained a finite HLS playlist.
    pub finished: bool,
    pub hls: bool,
    /// Finite HLS playlist (ENDLIST / PLAYLIST-TYPE:VOD).
    pub vod: bool,
    /// Pending HLS media fetches, sequence-tracked.
    pub segments: Vec<HlsSegment>,
    /// A media playlist has been parsed at least once.
    pub media_parsed: bool,
    pub last_sequence: u64,
    /// Secondary dedup of recently queued segment URLs, for servers with
    /// broken sequence numbering.
    pub seen_urls: VecDeque<String>,
    /// bandwidth -> variant URL from a master playlist.
    pub dynamic_streams: BTreeMap<u64, String>,
    /// Measured download bandwidth, bytes/s.
    pub network_bandwidth: u64,
    /// Next segment file number; `N.ts` with N monotonic from 1.
    pub next_file: u64,
    /// Completed segment names not yet evicted. `log_base` is the absolute
    /// index of `completed.front()`.
    completed: VecDeque<String>,
    log_base: u64,
    /// Absolute read cursor per attached consumer.
    cursors: HashMap<u64, u64>,
}

impl StreamState {
    fn new(id: StreamId, req: &StreamRequest, folder: PathBuf, fingerprint: Fingerprint) -> Self {
        Self {
            id,
            url: req.url.clone(),
            channel_name: req.channel_name.clone(),
            playlist_id: req.playlist_id.clone(),
            playlist_name: req.playlist_name.clone(),
            fingerprint,
            folder,
            started: false,
            finished: false,
            hls: false,
            vod: false,
            segments: Vec::new(),
            media_parsed: false,
            last_sequence: 0,
            seen_urls: VecDeque::new(),
            dynamic_streams: BTreeMap::new(),
            network_bandwidth: 0,
            next_file: 1,
            completed: VecDeque::new(),
            log_base: 0,
            cursors: HashMap::new(),
        }
    }

    /// Absolute index one past the newest completed segment.
    fn log_end(&self) -> u64 {
        self.log_base + self.completed.len() as u64
    }

    /// Claim the next segment file name.
    pub fn next_segment_name(&mut self) -> String {
        let name = format!("{}.ts", self.next_file);
        self.next_file += 1;
        name
    }

    /// Append a completed segment and mark the stream started.
    pub fn push_completed(&mut self, name: String) {
        self.completed.push_back(name);
        self.started = true;
    }
}

/// One playlist with active streams.
pub struct Playlist {
    pub id: PlaylistId,
    pub name: String,
    pub folder: PathBuf,
    pub tuner: u32,
    pub streams: HashMap<StreamId, StreamState>,
    /// HTTP clients attached per stream.
    pub clients: HashMap<StreamId, u32>,
}

/// Shared client-connection record, keyed by playlist + URL fingerprint.
#[derive(Default)]
pub struct ClientConnection {
    pub count: u32,
    /// Latched fatal producer error; consumers observing it abort.
    pub error: Option<Arc<Error>>,
}

type ClientKey = (PlaylistId, Fingerprint);

#[derive(Default)]
struct RegistryInner {
    playlists: HashMap<PlaylistId, Playlist>,
    clients: HashMap<ClientKey, ClientConnection>,
}

/// Admission request for one HTTP client.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub playlist_id: PlaylistId,
    pub playlist_name: String,
    pub channel_name: String,
    pub url: String,
    /// Tuner limit of the playlist this request belongs to.
    pub tuner: u32,
}

/// Everything a consumer or producer needs outside the lock.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    pub playlist_id: PlaylistId,
    pub stream_id: StreamId,
    pub fingerprint: Fingerprint,
    pub folder: PathBuf,
    pub url: String,
}

pub enum Admission {
    /// Attached to a newly created stream; the caller spawns its producer.
    NewStream { handle: StreamHandle, consumer: u64 },
    /// Attached to an existing stream for the same URL.
    Attached { handle: StreamHandle, consumer: u64 },
    /// Tuner limit reached; serve the limit video instead.
    Limit,
}

/// Outcome of detaching one consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detach {
    pub removed_stream: bool,
    pub removed_playlist: bool,
}

/// Result of one drain tick.
pub struct Drained {
    /// Segment file names in producer completion order.
    pub segments: Vec<String>,
    pub finished: bool,
    pub error: Option<Arc<Error>>,
}

/// Aggregate counts for the status surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryCounts {
    pub streams_active: u64,
    pub clients: u64,
}

pub struct BufferRegistry {
    inner: Mutex<RegistryInner>,
    next_consumer: AtomicU64,
    tmp_root: PathBuf,
}

impl BufferRegistry {
    #[must_use]
    pub fn new(tmp_root: PathBuf) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            next_consumer: AtomicU64::new(1),
            tmp_root,
        }
    }

    /// Admission control for one client request. Creates the playlist and
    /// stream entries as needed; never exceeds the playlist's tuner limit.
    pub fn admit(&self, req: &StreamRequest) -> Admission {
        let consumer = self.next_consumer.fetch_add(1, Ordering::Relaxed);
        let fingerprint = Fingerprint::of_url(&req.url);
        let mut inner = self.inner.lock();

        let playlist = inner
            .playlists
            .entry(req.playlist_id.clone())
            .or_insert_with(|| Playlist {
                id: req.playlist_id.clone(),
                name: req.playlist_name.clone(),
                folder: self.tmp_root.join(req.playlist_id.as_str()),
                tuner: req.tuner.max(1),
                streams: HashMap::new(),
                clients: HashMap::new(),
            });

        if let Some(existing) = playlist.streams.values_mut().find(|s| s.url == req.url) {
            let id = existing.id;
            // Late joiners see at most RETIRE_WINDOW earlier segments.
            let cursor = existing
                .log_end()
                .saturating_sub(RETIRE_WINDOW as u64)
                .max(existing.log_base);
            existing.cursors.insert(consumer, cursor);
            let handle = StreamHandle {
                playlist_id: req.playlist_id.clone(),
                stream_id: id,
                fingerprint: existing.fingerprint.clone(),
                folder: existing.folder.clone(),
                url: existing.url.clone(),
            };
            *playlist.clients.entry(id).or_insert(0) += 1;
            inner
                .clients
                .entry((req.playlist_id.clone(), fingerprint))
                .or_default()
                .count += 1;
            return Admission::Attached { handle, consumer };
        }

        if playlist.streams.len() >= playlist.tuner as usize {
            return Admission::Limit;
        }

        let id = StreamId(
            playlist
                .streams
                .keys()
                .map(|s| s.0 + 1)
                .max()
                .unwrap_or(1),
        );
        let folder = playlist.folder.join(fingerprint.as_str());
        let mut stream = StreamState::new(id, req, folder.clone(), fingerprint.clone());
        stream.cursors.insert(consumer, 0);
        let handle = StreamHandle {
            playlist_id: req.playlist_id.clone(),
            stream_id: id,
            fingerprint: fingerprint.clone(),
            folder,
            url: req.url.clone(),
        };
        playlist.streams.insert(id, stream);
        playlist.clients.insert(id, 1);
        inner
            .clients
            .entry((req.playlist_id.clone(), fingerprint))
            .or_default()
            .count += 1;
        Admission::NewStream { handle, consumer }
    }

    /// Detach one consumer. When the last one leaves, the stream entry (and
    /// an emptied playlist) disappear; the caller wipes the segment folder.
    pub fn detach(&self, handle: &StreamHandle, consumer: u64) -> Detach {
        let mut inner = self.inner.lock();
        let key = (handle.playlist_id.clone(), handle.fingerprint.clone());

        let emptied = match inner.clients.get_mut(&key) {
            Some(conn) => {
                conn.count = conn.count.saturating_sub(1);
                conn.count == 0
            }
            None => true,
        };
        if emptied {
            inner.clients.remove(&key);
        }

        let mut removed_stream = false;
        let mut removed_playlist = false;
        if let Some(playlist) = inner.playlists.get_mut(&handle.playlist_id) {
            if let Some(stream) = playlist.streams.get_mut(&handle.stream_id) {
                stream.cursors.remove(&consumer);
            }
            if let Some(count) = playlist.clients.get_mut(&handle.stream_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    playlist.clients.remove(&handle.stream_id);
                    playlist.streams.remove(&handle.stream_id);
                    removed_stream = true;
                }
            }
            if playlist.streams.is_empty() {
                inner.playlists.remove(&handle.playlist_id);
                removed_playlist = true;
            }
        }
        Detach {
            removed_stream,
            removed_playlist,
        }
    }

    /// Whether the stream still exists (producers poll this to learn about
    /// teardown).
    #[must_use]
    pub fn is_active(&self, handle: &StreamHandle) -> bool {
        self.inner
            .lock()
            .playlists
            .get(&handle.playlist_id)
            .is_some_and(|p| p.streams.contains_key(&handle.stream_id))
    }

    /// Run `f` against the stream state under the lock. Returns `None` when
    /// the stream is gone.
    pub fn with_stream<R>(
        &self,
        handle: &StreamHandle,
        f: impl FnOnce(&mut StreamState) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock();
        inner
            .playlists
            .get_mut(&handle.playlist_id)?
            .streams
            .get_mut(&handle.stream_id)
            .map(f)
    }

    /// Latch a fatal producer error onto the shared client connection.
    pub fn latch_error(&self, handle: &StreamHandle, error: Error) {
        let mut inner = self.inner.lock();
        let key = (handle.playlist_id.clone(), handle.fingerprint.clone());
        if let Some(conn) = inner.clients.get_mut(&key) {
            if conn.error.is_none() {
                conn.error = Some(Arc::new(error));
            }
        }
    }

    #[must_use]
    pub fn latched_error(&self, handle: &StreamHandle) -> Option<Arc<Error>> {
        let inner = self.inner.lock();
        let key = (handle.playlist_id.clone(), handle.fingerprint.clone());
        inner.clients.get(&key).and_then(|c| c.error.clone())
    }

    /// Atomically hand this consumer every segment completed since its last
    /// drain, advance its cursor, and evict segments that have fallen out of
    /// every consumer's retire window. Returns the evicted file names so the
    /// caller can delete them outside the lock.
    pub fn drain(&self, handle: &StreamHandle, consumer: u64) -> Option<(Drained, Vec<String>)> {
        let mut inner = self.inner.lock();
        let error = inner
            .clients
            .get(&(handle.playlist_id.clone(), handle.fingerprint.clone()))
            .and_then(|c| c.error.clone());

        let playlist = inner.playlists.get_mut(&handle.playlist_id)?;
        let stream = playlist.streams.get_mut(&handle.stream_id)?;

        let cursor = *stream.cursors.get(&consumer)?;
        let start = cursor.saturating_sub(stream.log_base) as usize;
        let segments: Vec<String> = stream.completed.iter().skip(start).cloned().collect();
        let end = stream.log_end();
        stream.cursors.insert(consumer, end);

        // Evict behind the slowest cursor, keeping the retire window.
        let mut evicted = Vec::new();
        if let Some(min_cursor) = stream.cursors.values().copied().min() {
            while stream.log_base + (RETIRE_WINDOW as u64) < min_cursor {
                match stream.completed.pop_front() {
                    Some(name) => {
                        stream.log_base += 1;
                        evicted.push(name);
                    }
                    None => break,
                }
            }
        }

        Some((
            Drained {
                segments,
                finished: stream.finished,
                error,
            },
            evicted,
        ))
    }

    /// Snapshot of the started flag, for the consumer wait loop.
    #[must_use]
    pub fn started(&self, handle: &StreamHandle) -> Option<bool> {
        self.inner
            .lock()
            .playlists
            .get(&handle.playlist_id)
            .and_then(|p| p.streams.get(&handle.stream_id))
            .map(|s| s.started)
    }

    #[must_use]
    pub fn counts(&self) -> RegistryCounts {
        let inner = self.inner.lock();
        RegistryCounts {
            streams_active: inner
                .playlists
                .values()
                .map(|p| p.streams.len() as u64)
                .sum(),
            clients: inner.clients.values().map(|c| u64::from(c.count)).sum(),
        }
    }
}
