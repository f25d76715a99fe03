use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::{BufferFs, FileStat, FsError, FsResult};

/// In-memory segment store. Files are `Bytes` values, so reads hand out
/// zero-copy clones. Directories are tracked explicitly so `stat` can
/// distinguish an empty directory from a missing one.
#[derive(Default)]
pub struct MemoryFs {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    files: HashMap<PathBuf, Bytes>,
    dirs: HashSet<PathBuf>,
}

impl MemoryFs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored files, for teardown assertions.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.inner.read().files.len()
    }
}

fn normalize(path: &Path) -> PathBuf {
    // Strip any leading separator so "/a/b" and "a/b" address the same entry.
    path.components()
        .filter(|c| !matches!(c, std::path::Component::RootDir))
        .collect()
}

#[async_trait]
impl BufferFs for MemoryFs {
    async fn write(&self, path: &Path, data: Bytes) -> FsResult<()> {
        let path = normalize(path);
        let mut inner = self.inner.write();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !inner.dirs.contains(parent) {
                return Err(FsError::NotFound(format!(
                    "parent directory missing: {}",
                    parent.display()
                )));
            }
        }
        inner.files.insert(path, data);
        Ok(())
    }

    async fn read(&self, path: &Path) -> FsResult<Bytes> {
        let path = normalize(path);
        self.inner
            .read()
            .files
            .get(&path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.display().to_string()))
    }

    async fn stat(&self, path: &Path) -> FsResult<FileStat> {
        let path = normalize(path);
        let inner = self.inner.read();
        if let Some(data) = inner.files.get(&path) {
            return Ok(FileStat {
                size: data.len() as u64,
                is_dir: false,
            });
        }
        if inner.dirs.contains(&path) {
            return Ok(FileStat {
                size: 0,
                is_dir: true,
            });
        }
        Err(FsError::NotFound(path.display().to_string()))
    }

    async fn mkdir_all(&self, path: &Path) -> FsResult<()> {
        let path = normalize(path);
        let mut inner = self.inner.write();
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            inner.dirs.insert(current.clone());
        }
        Ok(())
    }

    async fn remove_all(&self, path: &Path) -> FsResult<()> {
        let path = normalize(path);
        let mut inner = self.inner.write();
        inner
            .files
            .retain(|p, _| !(p == &path || p.starts_with(&path)));
        inner
            .dirs
            .retain(|p| !(p == &path || p.starts_with(&path)));
        Ok(())
    }
}
