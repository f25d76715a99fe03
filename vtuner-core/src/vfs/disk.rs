use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};

use super::{BufferFs, FileStat, FsError, FsResult};

/// On-disk segment store rooted at a base directory. All paths are resolved
/// relative to the root; traversal components are rejected.
pub struct DiskFs {
    root: PathBuf,
}

impl DiskFs {
    pub fn new(root: impl Into<PathBuf>) -> FsResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, path: &Path) -> FsResult<PathBuf> {
        let mut resolved = self.root.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(FsError::Io(format!(
                        "path escapes buffer root: {}",
                        path.display()
                    )));
                }
            }
        }
        Ok(resolved)
    }
}

#[async_trait]
impl BufferFs for DiskFs {
    async fn write(&self, path: &Path, data: Bytes) -> FsResult<()> {
        let path = self.resolve(path)?;
        tokio::fs::write(&path, &data).await?;
        Ok(())
    }

    async fn read(&self, path: &Path) -> FsResult<Bytes> {
        let path = self.resolve(path)?;
        let data = tokio::fs::read(&path).await?;
        Ok(Bytes::from(data))
    }

    async fn stat(&self, path: &Path) -> FsResult<FileStat> {
        let path = self.resolve(path)?;
        let meta = tokio::fs::metadata(&path).await?;
        Ok(FileStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    async fn mkdir_all(&self, path: &Path) -> FsResult<()> {
        let path = self.resolve(path)?;
        tokio::fs::create_dir_all(&path).await?;
        Ok(())
    }

    async fn remove_all(&self, path: &Path) -> FsResult<()> {
        let path = self.resolve(path)?;
        let result = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DiskFs::new(dir.path()).unwrap();

        fs.mkdir_all(Path::new("p/f")).await.unwrap();
        fs.write(Path::new("p/f/1.ts"), Bytes::from_static(b"abc"))
            .await
            .unwrap();

        assert_eq!(
            fs.read(Path::new("p/f/1.ts")).await.unwrap().as_ref(),
            b"abc"
        );
        let stat = fs.stat(Path::new("p/f/1.ts")).await.unwrap();
        assert_eq!(stat.size, 3);
        assert!(!stat.is_dir);
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DiskFs::new(dir.path()).unwrap();
        let err = fs.read(Path::new("nope.ts")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DiskFs::new(dir.path()).unwrap();
        let err = fs
            .write(Path::new("../escape.ts"), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_remove_all_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DiskFs::new(dir.path()).unwrap();
        fs.mkdir_all(Path::new("p")).await.unwrap();
        fs.remove_all(Path::new("p")).await.unwrap();
        fs.remove_all(Path::new("p")).await.unwrap();
        assert!(!fs.exists(Path::new("p")).await);
    }
}
