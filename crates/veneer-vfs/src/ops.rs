//! The lookup contract.
//!
//! The read-only lookup contract every namespace exposes: metadata, listing,
//! positional reads and change subscriptions. The overlay consumes it from a
//! source and implements it again, so the two are interchangeable.

use async_trait::async_trait;
use std::path::Path;

use super::types::{DirEntry, FileAttr, FileSnapshot};
use super::watch::ChangeSubscription;
use super::{VfsError, VfsResult};

/// Largest chunk requested per `read` call by the convenience readers.
const READ_CHUNK: u32 = 1024 * 1024;

/// Read-only namespace. Paths are relative to the namespace root and a
/// leading `/` is ignored.
#[async_trait]
pub trait VfsOps: Send + Sync {
    /// Attributes of the file or directory at `path`.
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Immediate children of a directory, sorted by name.
    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    /// Up to `size` bytes starting at `offset`; short at end of file.
    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>>;

    /// Subscribe to changes of paths matching `pattern`.
    async fn watch(&self, pattern: &str) -> VfsResult<ChangeSubscription>;

    /// True when `getattr` succeeds.
    async fn exists(&self, path: &Path) -> bool {
        self.getattr(path).await.is_ok()
    }

    /// Whole file content.
    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        Ok(self.snapshot(path).await?.data)
    }

    /// Read entire file contents together with its attributes.
    ///
    /// The default reads attributes first and then the bytes; backends that
    /// can take both from one open handle should override this.
    async fn snapshot(&self, path: &Path) -> VfsResult<FileSnapshot> {
        let attr = self.getattr(path).await?;
        if attr.is_dir() {
            return Err(VfsError::is_a_directory(path.display().to_string()));
        }

        let mut data = Vec::with_capacity(attr.size as usize);
        loop {
            let chunk = self.read(path, data.len() as u64, READ_CHUNK).await?;
            if chunk.is_empty() {
                break;
            }
            data.extend_from_slice(&chunk);
        }

        // The size reported must describe the bytes actually returned.
        let attr = FileAttr {
            size: data.len() as u64,
            ..attr
        };
        Ok(FileSnapshot { data, attr })
    }
}
