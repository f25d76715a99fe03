//! Virtual buffer filesystem
//!
//! Segment storage for the stream buffer. Producers write whole numbered
//! segment files, consumers read them back and evict old ones. The backend is
//! chosen at startup: in-memory for ephemeral buffering or on-disk for large
//! buffers.

mod disk;
mod memory;

pub use disk::DiskFs;
pub use memory::MemoryFs;

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(String),
}

impl FsError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            FsError::NotFound(err.to_string())
        } else {
            FsError::Io(err.to_string())
        }
    }
}

pub type FsResult<T> = std::result::Result<T, FsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
}

/// Segment store abstraction. Paths are relative, `/`-separated.
#[async_trait]
pub trait BufferFs: Send + Sync {
    /// Write a complete file, replacing any previous content.
    async fn write(&self, path: &Path, data: Bytes) -> FsResult<()>;

    /// Read a complete file.
    async fn read(&self, path: &Path) -> FsResult<Bytes>;

    async fn stat(&self, path: &Path) -> FsResult<FileStat>;

    async fn mkdir_all(&self, path: &Path) -> FsResult<()>;

    /// Remove a file or a directory tree. Missing targets are not an error.
    async fn remove_all(&self, path: &Path) -> FsResult<()>;

    async fn exists(&self, path: &Path) -> bool {
        self.stat(path).await.is_ok()
    }
}

/// Build the configured backend.
pub fn from_config(backend: &str, disk_root: &Path) -> FsResult<std::sync::Arc<dyn BufferFs>> {
    match backend {
        "disk" => Ok(std::sync::Arc::new(DiskFs::new(disk_root)?)),
        _ => Ok(std::sync::Arc::new(MemoryFs::new())),
    }
}
