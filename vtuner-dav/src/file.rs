//! Streaming WebDAV file handles
//!
//! `StreamingFile` reads an upstream URL on demand: a non-zero position turns
//! into a `Range: bytes=<pos>-` request, transient read errors reopen the
//! stream at the current position, and reads starting at byte zero feed the
//! partial content cache. `MemFile` serves small local documents such as
//! `listing.m3u`.

use bytes::{Buf, Bytes, BytesMut};
use dav_server::fs::{DavFile, DavMetaData, FsError, FsFuture, FsResult};
use futures::Stream;
use futures::StreamExt;
use std::io::SeekFrom;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type UpstreamStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send + Sync>>;

use vtuner_core::Fetcher;

use crate::cache::FileMeta;
use crate::content_cache::ContentCache;
use crate::fs::VodMeta;

const READ_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

pub struct StreamingFile {
    fetcher: Arc<Fetcher>,
    content_cache: Arc<ContentCache>,
    url: String,
    meta: FileMeta,
    pos: u64,
    buffer: BytesMut,
    stream: Option<UpstreamStream>,
    /// Bytes still to discard when the server answered a range request with
    /// a full 200 body.
    skip: u64,
    /// Prefix accumulator feeding the content cache; active only for streams
    /// opened at byte zero.
    prefix_acc: Option<BytesMut>,
    /// Upstream reported end of file; cleared by seeking.
    eof: bool,
}

impl std::fmt::Debug for StreamingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingFile")
            .field("url", &self.url)
            .field("pos", &self.pos)
            .field("size", &self.meta.size)
            .finish()
    }
}

impl StreamingFile {
    #[must_use]
    pub fn new(
        fetcher: Arc<Fetcher>,
        content_cache: Arc<ContentCache>,
        url: String,
        meta: FileMeta,
    ) -> Self {
        Self {
            fetcher,
            content_cache,
            url,
            meta,
            pos: 0,
            buffer: BytesMut::new(),
            stream: None,
            skip: 0,
            prefix_acc: None,
            eof: false,
        }
    }

    /// Absolute offset of the next byte the upstream stream will yield.
    fn upstream_pos(&self) -> u64 {
        self.pos + self.buffer.len() as u64
    }

    async fn open_at(&mut self, offset: u64) -> FsResult<()> {
        let response = if offset == 0 {
            self.fetcher.get(&self.url).await
        } else {
            self.fetcher.get_with_range(&self.url, offset).await
        }
        .map_err(map_core_error)?;

        let status = response.status();
        self.skip = match status.as_u16() {
            206 => 0,
            200 => offset,
            404 => return Err(FsError::NotFound),
            _ => {
                return Err(FsError::GeneralFailure);
            }
        };
        if offset == 0 && self.content_cache.get(&self.url).is_none() {
            self.prefix_acc = Some(BytesMut::new());
        }
        self.stream = Some(Box::pin(response.bytes_stream()));
        Ok(())
    }

    fn feed_prefix(&mut self, chunk: &[u8]) {
        let limit = self.content_cache.entry_limit();
        if let Some(acc) = self.prefix_acc.as_mut() {
            let room = limit.saturating_sub(acc.len());
            acc.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if acc.len() >= limit {
                let acc = self.prefix_acc.take().expect("accumulator present");
                self.content_cache.insert(&self.url, acc.freeze());
            }
        }
    }

    fn finish_prefix(&mut self) {
        if let Some(acc) = self.prefix_acc.take() {
            if !acc.is_empty() {
                self.content_cache.insert(&self.url, acc.freeze());
            }
        }
    }

    fn drop_stream(&mut self) {
        self.stream = None;
        self.skip = 0;
        self.prefix_acc = None;
        self.buffer.clear();
        self.eof = false;
    }

    async fn fill(&mut self, count: usize) -> FsResult<bool> {
        let mut attempts = 0u32;
        while !self.eof && self.buffer.len() < count {
            if self.stream.is_none() {
                let offset = self.upstream_pos();
                match self.open_at(offset).await {
                    Ok(()) => {}
                    Err(e @ (FsError::NotFound | FsError::Forbidden)) => return Err(e),
                    Err(e) => {
                        if attempts >= READ_RETRIES {
                            return Err(e);
                        }
                        attempts += 1;
                        debug!(url = %self.url, attempts, "upstream open failed, retrying");
                        tokio::time::sleep(RETRY_BACKOFF).await;
                        continue;
                    }
                }
            }
            match self
                .stream
                .as_mut()
                .expect("stream just opened")
                .next()
                .await
            {
                Some(Ok(mut chunk)) => {
                    attempts = 0;
                    if self.skip > 0 {
                        let discard = (self.skip).min(chunk.len() as u64) as usize;
                        chunk.advance(discard);
                        self.skip -= discard as u64;
                        if chunk.is_empty() {
                            continue;
                        }
                    }
                    self.feed_prefix(&chunk);
                    self.buffer.extend_from_slice(&chunk);
                }
                Some(Err(e)) => {
                    if attempts >= READ_RETRIES {
                        return Err(FsError::GeneralFailure);
                    }
                    attempts += 1;
                    debug!(url = %self.url, error = %e, attempts, "upstream read failed, reopening");
                    self.stream = None;
                    self.skip = 0;
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                None => {
                    self.stream = None;
                    self.eof = true;
                    self.finish_prefix();
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

fn map_core_error(err: vtuner_core::Error) -> FsError {
    match err {
        vtuner_core::Error::NotFound(_) => FsError::NotFound,
        vtuner_core::Error::Forbidden(_) => FsError::Forbidden,
        _ => FsError::GeneralFailure,
    }
}

impl DavFile for StreamingFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = VodMeta::file(&self.meta);
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }

    fn write_buf(&mut self, _buf: Box<dyn Buf + Send>) -> FsFuture<'_, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn write_bytes(&mut self, _buf: Bytes) -> FsFuture<'_, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async move {
            // Serve entirely from the cached prefix when possible.
            if self.stream.is_none() && self.buffer.is_empty() {
                if let Some(cached) = self.content_cache.get(&self.url) {
                    let end = self.pos.saturating_add(count as u64);
                    if end <= cached.len() as u64 {
                        let out = cached.slice(self.pos as usize..end as usize);
                        self.pos = end;
                        return Ok(out);
                    }
                }
            }

            self.fill(count).await?;
            let take = count.min(self.buffer.len());
            let out = self.buffer.split_to(take).freeze();
            self.pos += out.len() as u64;
            Ok(out)
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async move {
            let target = match pos {
                SeekFrom::Start(n) => n,
                SeekFrom::Current(delta) => {
                    let base = i64::try_from(self.pos).map_err(|_| FsError::GeneralFailure)?;
                    u64::try_from(base + delta).map_err(|_| FsError::GeneralFailure)?
                }
                SeekFrom::End(_) => return Err(FsError::NotImplemented),
            };
            if target != self.pos {
                self.drop_stream();
                self.pos = target;
            }
            Ok(self.pos)
        })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Whole-in-memory file, used for the per-playlist `listing.m3u`.
#[derive(Debug)]
pub struct MemFile {
    data: Bytes,
    meta: VodMeta,
    pos: usize,
}

impl MemFile {
    #[must_use]
    pub fn new(data: Bytes, meta: VodMeta) -> Self {
        Self { data, meta, pos: 0 }
    }
}

impl DavFile for MemFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = self.meta.clone();
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }

    fn write_buf(&mut self, _buf: Box<dyn Buf + Send>) -> FsFuture<'_, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn write_bytes(&mut self, _buf: Bytes) -> FsFuture<'_, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async move {
            let end = (self.pos + count).min(self.data.len());
            let out = self.data.slice(self.pos..end);
            self.pos = end;
            Ok(out)
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async move {
            let target = match pos {
                SeekFrom::Start(n) => usize::try_from(n).map_err(|_| FsError::GeneralFailure)?,
                SeekFrom::Current(delta) => {
                    let base = i64::try_from(self.pos).map_err(|_| FsError::GeneralFailure)?;
                    usize::try_from(base + delta).map_err(|_| FsError::GeneralFailure)?
                }
                SeekFrom::End(delta) => {
                    let base = i64::try_from(self.data.len())
                        .map_err(|_| FsError::GeneralFailure)?;
                    usize::try_from(base + delta).map_err(|_| FsError::GeneralFailure)?
                }
            };
            self.pos = target.min(self.data.len());
            Ok(self.pos as u64)
        })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
