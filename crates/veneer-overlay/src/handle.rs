//! Lookup results.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use veneer_vfs::{FileAttr, FileSnapshot, VfsError, VfsOps, VfsResult};

/// What a lookup resolved to.
///
/// A staged handle holds the staged file open, so its attributes and its
/// bytes describe the same version even if a refresh renames a new copy
/// into place afterwards.
#[derive(Clone)]
pub struct FileHandle {
    path: PathBuf,
    state: HandleState,
}

#[derive(Clone)]
enum HandleState {
    Staged { file: Arc<File>, attr: FileAttr },
    Source { attr: FileAttr, source: Arc<dyn VfsOps> },
    Missing,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.state {
            HandleState::Staged { .. } => "staged",
            HandleState::Source { .. } => "source",
            HandleState::Missing => "missing",
        };
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("kind", &kind)
            .field("attr", &self.attr())
            .finish()
    }
}

impl FileHandle {
    pub(crate) fn missing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: HandleState::Missing,
        }
    }

    /// Open the staged copy at `staged`. A staged file that cannot be
    /// opened resolves to a missing handle.
    pub(crate) async fn staged(path: impl Into<PathBuf>, staged: PathBuf) -> Self {
        let path = path.into();
        match open_staged(staged).await {
            Ok((file, attr)) => Self {
                path,
                state: HandleState::Staged {
                    file: Arc::new(file),
                    attr,
                },
            },
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "staged copy unavailable");
                Self::missing(path)
            }
        }
    }

    /// Resolve `path` straight through to `source`.
    pub(crate) async fn source(source: Arc<dyn VfsOps>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match source.getattr(&path).await {
            Ok(attr) => Self {
                path,
                state: HandleState::Source { attr, source },
            },
            Err(_) => Self::missing(path),
        }
    }

    /// The path this handle was looked up with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        !matches!(self.state, HandleState::Missing)
    }

    /// Whether the handle points at a staged copy rather than the source.
    pub fn is_overlay(&self) -> bool {
        matches!(self.state, HandleState::Staged { .. })
    }

    pub fn attr(&self) -> Option<&FileAttr> {
        match &self.state {
            HandleState::Staged { attr, .. } | HandleState::Source { attr, .. } => Some(attr),
            HandleState::Missing => None,
        }
    }

    /// Size in bytes; zero when the file does not exist.
    pub fn len(&self) -> u64 {
        self.attr().map(|a| a.size).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.attr().map(|a| a.mtime)
    }

    /// Read `size` bytes from `offset`.
    pub async fn read(&self, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        match &self.state {
            HandleState::Staged { file, attr } => {
                let len = attr.size.saturating_sub(offset).min(u64::from(size));
                read_staged(file.clone(), offset, len).await
            }
            HandleState::Source { source, .. } => source.read(&self.path, offset, size).await,
            HandleState::Missing => Err(self.not_found()),
        }
    }

    /// Read the whole file.
    pub async fn read_all(&self) -> VfsResult<Vec<u8>> {
        Ok(self.snapshot().await?.data)
    }

    /// Bytes and attributes of the file. For a staged handle both come from
    /// the same open file.
    pub async fn snapshot(&self) -> VfsResult<FileSnapshot> {
        match &self.state {
            HandleState::Staged { file, attr } => {
                let data = read_staged(file.clone(), 0, attr.size).await?;
                Ok(FileSnapshot {
                    data,
                    attr: attr.clone(),
                })
            }
            HandleState::Source { source, .. } => source.snapshot(&self.path).await,
            HandleState::Missing => Err(self.not_found()),
        }
    }

    fn not_found(&self) -> VfsError {
        VfsError::not_found(self.path.display().to_string())
    }
}

async fn open_staged(staged: PathBuf) -> io::Result<(File, FileAttr)> {
    tokio::task::spawn_blocking(move || {
        let file = File::open(&staged)?;
        let attr = FileAttr::from_metadata(&file.metadata()?);
        Ok((file, attr))
    })
    .await
    .map_err(io::Error::other)?
}

async fn read_staged(file: Arc<File>, offset: u64, len: u64) -> VfsResult<Vec<u8>> {
    let data = tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "read too large"))?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = read_at(&file, &mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    })
    .await
    .map_err(io::Error::other)??;
    Ok(data)
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use veneer_vfs::MemoryBackend;

    #[tokio::test]
    async fn test_staged_handle_survives_replacement() {
        let dir = TempDir::new().unwrap();
        let staged = dir.path().join("a.txt");
        std::fs::write(&staged, b"first version").unwrap();

        let handle = FileHandle::staged("a.txt", staged.clone()).await;
        assert!(handle.exists());
        assert!(handle.is_overlay());
        assert_eq!(handle.len(), 13);

        let replacement = dir.path().join("b.txt");
        std::fs::write(&replacement, b"second").unwrap();
        std::fs::rename(&replacement, &staged).unwrap();

        assert_eq!(handle.read_all().await.unwrap(), b"first version");
        assert_eq!(handle.read(6, 100).await.unwrap(), b"version");
    }

    #[tokio::test]
    async fn test_vanished_staged_file_is_missing() {
        let dir = TempDir::new().unwrap();
        let handle = FileHandle::staged("a.txt", dir.path().join("a.txt")).await;
        assert!(!handle.exists());
        assert_eq!(handle.len(), 0);
        assert!(handle.modified().is_none());
        assert!(handle.read_all().await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_source_handle() {
        let source = Arc::new(MemoryBackend::new());
        source.write_file("x/y.txt", "through").unwrap();

        let handle = FileHandle::source(source.clone(), "x/y.txt").await;
        assert!(handle.exists());
        assert!(!handle.is_overlay());
        assert_eq!(handle.read_all().await.unwrap(), b"through");

        let missing = FileHandle::source(source, "nope").await;
        assert!(!missing.exists());
    }
}
