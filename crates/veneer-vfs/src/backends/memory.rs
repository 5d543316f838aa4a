//! In-process backend.
//!
//! Files live in a map keyed by the same normalized `a/b/c` form that watch
//! patterns match against, so a mutation can be announced with the key it
//! was stored under. Mutation goes through inherent methods; the
//! [`VfsOps`] side stays read-only.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

use crate::error::{VfsError, VfsResult};
use crate::ops::VfsOps;
use crate::types::{DirEntry, FileAttr, FileSnapshot, FileType};
use crate::watch::{ChangeSubscription, WatchRegistry, watch_key};

const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, attr: FileAttr },
    Dir { attr: FileAttr },
}

impl Node {
    fn attr(&self) -> &FileAttr {
        match self {
            Node::File { attr, .. } | Node::Dir { attr } => attr,
        }
    }

    fn dir() -> Self {
        Node::Dir {
            attr: FileAttr::directory(DIR_MODE),
        }
    }
}

/// Parent key of `key`; the root is `""`.
fn parent_key(key: &str) -> &str {
    key.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// Files and directories held in memory, with change notification.
///
/// The root directory always exists and is never stored.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    nodes: RwLock<BTreeMap<String, Node>>,
    registry: WatchRegistry,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create directories for every ancestor of `key`.
    fn make_parents(nodes: &mut BTreeMap<String, Node>, key: &str) -> VfsResult<()> {
        let parent = parent_key(key);
        if parent.is_empty() {
            return Ok(());
        }
        let mut prefix = String::new();
        for segment in parent.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            if let Node::File { .. } = nodes.entry(prefix.clone()).or_insert_with(Node::dir) {
                return Err(VfsError::not_a_directory(prefix));
            }
        }
        Ok(())
    }

    /// Create or overwrite a file, stamped with the current time. Parent
    /// directories are created as needed.
    pub fn write_file(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) -> VfsResult<FileAttr> {
        let key = watch_key(path.as_ref());
        if key.is_empty() {
            return Err(VfsError::is_a_directory("/"));
        }
        let data = data.into();

        let attr = {
            let mut nodes = self.nodes.write();
            let perm = match nodes.get(&key) {
                Some(Node::Dir { .. }) => return Err(VfsError::is_a_directory(key)),
                Some(Node::File { attr, .. }) => attr.perm,
                None => FILE_MODE,
            };
            Self::make_parents(&mut nodes, &key)?;

            let attr = FileAttr::file(data.len() as u64, perm);
            nodes.insert(key.clone(), Node::File {
                data,
                attr: attr.clone(),
            });
            attr
        };

        self.registry.notify(Path::new(&key));
        Ok(attr)
    }

    /// Change the modification time of an existing file or directory.
    pub fn set_mtime(&self, path: impl AsRef<Path>, mtime: SystemTime) -> VfsResult<()> {
        let key = watch_key(path.as_ref());
        match self.nodes.write().get_mut(&key) {
            Some(Node::File { attr, .. } | Node::Dir { attr }) => attr.mtime = mtime,
            None => return Err(VfsError::not_found(key)),
        }
        self.registry.notify(Path::new(&key));
        Ok(())
    }

    /// Delete a file. Directories cannot be removed this way.
    pub fn remove_file(&self, path: impl AsRef<Path>) -> VfsResult<()> {
        let key = watch_key(path.as_ref());
        {
            let mut nodes = self.nodes.write();
            match nodes.get(&key) {
                Some(Node::File { .. }) => {
                    nodes.remove(&key);
                }
                Some(Node::Dir { .. }) => return Err(VfsError::is_a_directory(key)),
                None => return Err(VfsError::not_found(key)),
            }
        }
        self.registry.notify(Path::new(&key));
        Ok(())
    }

    /// Create a directory and its parents. Existing directories are fine.
    pub fn create_dir(&self, path: impl AsRef<Path>) -> VfsResult<()> {
        let key = watch_key(path.as_ref());
        if key.is_empty() {
            return Ok(());
        }
        let mut nodes = self.nodes.write();
        Self::make_parents(&mut nodes, &key)?;
        match nodes.entry(key.clone()).or_insert_with(Node::dir) {
            Node::Dir { .. } => Ok(()),
            Node::File { .. } => Err(VfsError::not_a_directory(key)),
        }
    }

    /// Number of live change subscriptions.
    pub fn watcher_count(&self) -> usize {
        self.registry.len()
    }

    fn with_file<T>(&self, path: &Path, f: impl FnOnce(&[u8], &FileAttr) -> T) -> VfsResult<T> {
        let key = watch_key(path);
        match self.nodes.read().get(&key) {
            Some(Node::File { data, attr }) => Ok(f(data, attr)),
            Some(Node::Dir { .. }) => Err(VfsError::is_a_directory(key)),
            None if key.is_empty() => Err(VfsError::is_a_directory("/")),
            None => Err(VfsError::not_found(key)),
        }
    }
}

#[async_trait]
impl VfsOps for MemoryBackend {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let key = watch_key(path);
        if key.is_empty() {
            return Ok(FileAttr::directory(DIR_MODE));
        }
        self.nodes
            .read()
            .get(&key)
            .map(|node| node.attr().clone())
            .ok_or_else(|| VfsError::not_found(key))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let key = watch_key(path);
        let nodes = self.nodes.read();
        match nodes.get(&key) {
            _ if key.is_empty() => {}
            Some(Node::Dir { .. }) => {}
            Some(Node::File { .. }) => return Err(VfsError::not_a_directory(key)),
            None => return Err(VfsError::not_found(key)),
        }

        // BTreeMap iteration is already name-ordered.
        Ok(nodes
            .iter()
            .filter(|(child, _)| !child.is_empty() && parent_key(child) == key)
            .map(|(child, node)| {
                let name = child.rsplit('/').next().unwrap_or(child);
                let kind = match node {
                    Node::File { .. } => FileType::File,
                    Node::Dir { .. } => FileType::Directory,
                };
                DirEntry::new(name, kind)
            })
            .collect())
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        self.with_file(path, |data, _| {
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
            let end = start.saturating_add(size as usize).min(data.len());
            data[start..end].to_vec()
        })
    }

    async fn watch(&self, pattern: &str) -> VfsResult<ChangeSubscription> {
        self.registry.subscribe(pattern)
    }

    async fn snapshot(&self, path: &Path) -> VfsResult<FileSnapshot> {
        self.with_file(path, |data, attr| FileSnapshot {
            data: data.to_vec(),
            attr: attr.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parent_key() {
        assert_eq!(parent_key("a/b/c.txt"), "a/b");
        assert_eq!(parent_key("c.txt"), "");
    }

    #[tokio::test]
    async fn test_spellings_share_a_file() {
        let vfs = MemoryBackend::new();
        vfs.write_file("/site//./index.html", "<p>").unwrap();

        for spelling in ["site/index.html", "/site/index.html", "site/x/../index.html"] {
            let data = vfs.read_all(Path::new(spelling)).await.unwrap();
            assert_eq!(data, b"<p>", "{spelling}");
        }
    }

    #[tokio::test]
    async fn test_read_window() {
        let vfs = MemoryBackend::new();
        vfs.write_file("f", "0123456789").unwrap();

        assert_eq!(vfs.read(Path::new("f"), 3, 4).await.unwrap(), b"3456");
        assert_eq!(vfs.read(Path::new("f"), 8, 100).await.unwrap(), b"89");
        assert!(vfs.read(Path::new("f"), u64::MAX, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_read_all_spans_chunks() {
        struct ChunkedOnly(MemoryBackend);

        #[async_trait]
        impl VfsOps for ChunkedOnly {
            async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
                self.0.getattr(path).await
            }
            async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
                self.0.readdir(path).await
            }
            async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
                self.0.read(path, offset, size).await
            }
            async fn watch(&self, pattern: &str) -> VfsResult<ChangeSubscription> {
                self.0.watch(pattern).await
            }
        }

        let inner = MemoryBackend::new();
        let big: Vec<u8> = (0..3 * 1024 * 1024 + 11).map(|i| (i % 251) as u8).collect();
        inner.write_file("big.bin", big.clone()).unwrap();

        let vfs = ChunkedOnly(inner);
        let snap = vfs.snapshot(Path::new("big.bin")).await.unwrap();
        assert_eq!(snap.data, big);
        assert_eq!(snap.attr.size, big.len() as u64);
    }

    #[tokio::test]
    async fn test_listing_is_sorted_and_shallow() {
        let vfs = MemoryBackend::new();
        vfs.write_file("b.txt", "").unwrap();
        vfs.write_file("a/nested/deep.txt", "").unwrap();
        vfs.create_dir("c").unwrap();

        let root = vfs.readdir(Path::new("/")).await.unwrap();
        assert_eq!(
            root,
            vec![
                DirEntry::directory("a"),
                DirEntry::file("b.txt"),
                DirEntry::directory("c"),
            ]
        );
        assert_eq!(
            vfs.readdir(Path::new("a")).await.unwrap(),
            vec![DirEntry::directory("nested")]
        );
        assert!(matches!(
            vfs.readdir(Path::new("b.txt")).await,
            Err(VfsError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_file_cannot_become_parent() {
        let vfs = MemoryBackend::new();
        vfs.write_file("a", "x").unwrap();

        assert!(matches!(
            vfs.write_file("a/b.txt", "y"),
            Err(VfsError::NotADirectory(_))
        ));
        assert!(matches!(
            vfs.write_file("/", "y"),
            Err(VfsError::IsADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_set_mtime_shows_in_snapshot() {
        let vfs = MemoryBackend::new();
        vfs.write_file("page.html", "<p>").unwrap();
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        vfs.set_mtime("page.html", when).unwrap();

        let snap = vfs.snapshot(Path::new("page.html")).await.unwrap();
        assert_eq!(snap.data, b"<p>");
        assert_eq!(snap.mtime(), when);
        assert!(vfs.set_mtime("nope", when).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_remove_file() {
        let vfs = MemoryBackend::new();
        vfs.write_file("dir/gone.txt", "x").unwrap();
        vfs.remove_file("dir/gone.txt").unwrap();

        assert!(!vfs.exists(Path::new("dir/gone.txt")).await);
        assert!(vfs.remove_file("dir/gone.txt").unwrap_err().is_not_found());
        assert!(matches!(
            vfs.remove_file("dir"),
            Err(VfsError::IsADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_mutations_notify_watchers() {
        let vfs = MemoryBackend::new();
        vfs.write_file("index.html", "v1").unwrap();

        let mut sub = vfs.watch("index.html").await.unwrap();
        let mut other = vfs.watch("other.html").await.unwrap();
        assert_eq!(vfs.watcher_count(), 2);

        vfs.write_file("/index.html", "v2").unwrap();
        let changed = tokio::time::timeout(Duration::from_secs(1), sub.changed())
            .await
            .unwrap();
        assert!(changed);
        assert!(!other.drain());

        vfs.set_mtime("index.html", SystemTime::now()).unwrap();
        assert!(sub.drain());

        vfs.remove_file("index.html").unwrap();
        assert!(sub.drain());

        drop(other);
        assert_eq!(vfs.watcher_count(), 1);
    }
}
