//! Streaming buffer and fan-out
//!
//! A tuner-limited, content-addressed, segment-based buffer: one producer
//! task per unique upstream URL feeds segment files through the virtual
//! filesystem to any number of concurrent HTTP consumers.

pub mod consumer;
pub mod hls;
pub mod limit;
pub mod producer;
pub mod registry;

use bytes::Bytes;
use std::sync::Arc;

use vtuner_core::config::{BufferConfig, FetchConfig};
use vtuner_core::vfs::BufferFs;
use vtuner_core::Fetcher;

pub use registry::{Admission, BufferRegistry, RegistryCounts, StreamHandle, StreamRequest};

/// Shared dependencies of producers and consumers.
pub struct BufferContext {
    pub registry: Arc<BufferRegistry>,
    pub vfs: Arc<dyn BufferFs>,
    pub fetcher: Arc<Fetcher>,
    pub buffer: BufferConfig,
    pub fetch: FetchConfig,
    /// Pre-loaded tuner-limit video blob.
    pub limit_video: Bytes,
}

impl BufferContext {
    #[must_use]
    pub fn new(
        registry: Arc<BufferRegistry>,
        vfs: Arc<dyn BufferFs>,
        fetcher: Arc<Fetcher>,
        buffer: BufferConfig,
        fetch: FetchConfig,
        limit_video: Bytes,
    ) -> Self {
        Self {
            registry,
            vfs,
            fetcher,
            buffer,
            fetch,
            limit_video,
        }
    }
}
