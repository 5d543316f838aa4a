//! Directory on the host filesystem.
//!
//! Changes are picked up by one recursive `notify` watcher per backend,
//! started the first time someone subscribes.

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{VfsError, VfsResult};
use crate::ops::VfsOps;
use crate::types::{DirEntry, FileAttr, FileSnapshot, FileType};
use crate::watch::{ChangeSubscription, WatchRegistry};

/// Read-only view of the directory tree under `root`.
///
/// Every path is resolved against the canonical root and must stay inside
/// it after symlinks are followed.
#[derive(Clone)]
pub struct LocalBackend {
    root: PathBuf,
    registry: Arc<WatchRegistry>,
    /// Shared by clones, so they also share one OS watcher.
    watcher: Arc<Mutex<Option<RecommendedWatcher>>>,
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("root", &self.root)
            .field("watching", &self.watcher.lock().is_some())
            .finish()
    }
}

impl LocalBackend {
    /// `root` is canonicalized once here (on macOS `/tmp` is really
    /// `/private/tmp`, and watcher events report the real path).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            registry: Arc::new(WatchRegistry::new()),
            watcher: Arc::new(Mutex::new(None)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for `path`, which must exist and lie under the root.
    fn resolve(&self, path: &Path) -> VfsResult<PathBuf> {
        let relative = path.strip_prefix("/").unwrap_or(path);
        if relative.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }

        let host = dunce::canonicalize(self.root.join(relative))
            .map_err(|e| Self::map_io(e, path))?;
        if host.starts_with(&self.root) {
            Ok(host)
        } else {
            Err(VfsError::path_escapes_root(path.display().to_string()))
        }
    }

    fn map_io(e: io::Error, path: &Path) -> VfsError {
        let shown = path.display().to_string();
        match e.kind() {
            io::ErrorKind::NotFound => VfsError::not_found(shown),
            io::ErrorKind::PermissionDenied => VfsError::PermissionDenied(shown),
            _ => VfsError::Io(e),
        }
    }

    fn ensure_watcher(&self) -> VfsResult<()> {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return Ok(());
        }

        let registry = Arc::clone(&self.registry);
        let root = self.root.clone();
        let handler = move |result: Result<Event, notify::Error>| match result {
            Ok(event)
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) =>
            {
                for path in &event.paths {
                    if let Ok(relative) = path.strip_prefix(&root) {
                        registry.notify(relative);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "file watcher error"),
        };

        let mut watcher = RecommendedWatcher::new(
            handler,
            notify::Config::default().with_poll_interval(Duration::from_millis(500)),
        )
        .map_err(|e| VfsError::Watch(e.to_string()))?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| VfsError::Watch(format!("{}: {e}", self.root.display())))?;

        tracing::info!(path = %self.root.display(), "file watcher started");
        *slot = Some(watcher);
        Ok(())
    }
}

#[async_trait]
impl VfsOps for LocalBackend {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let host = self.resolve(path)?;
        let meta = fs::metadata(&host).await.map_err(|e| Self::map_io(e, path))?;
        Ok(FileAttr::from_metadata(&meta))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let host = self.resolve(path)?;
        let mut dir = fs::read_dir(&host).await.map_err(|e| Self::map_io(e, path))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let kind = FileType::from_std(entry.file_type().await?);
            entries.push(DirEntry::new(entry.file_name().to_string_lossy(), kind));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let host = self.resolve(path)?;
        let mut file = fs::File::open(&host).await.map_err(|e| Self::map_io(e, path))?;
        file.seek(io::SeekFrom::Start(offset)).await?;

        let mut buf = Vec::with_capacity(size as usize);
        file.take(u64::from(size)).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn watch(&self, pattern: &str) -> VfsResult<ChangeSubscription> {
        self.ensure_watcher()?;
        self.registry.subscribe(pattern)
    }

    async fn snapshot(&self, path: &Path) -> VfsResult<FileSnapshot> {
        let host = self.resolve(path)?;
        let mut file = fs::File::open(&host).await.map_err(|e| Self::map_io(e, path))?;

        // Attributes and bytes come from the same open file.
        let meta = file.metadata().await?;
        if meta.is_dir() {
            return Err(VfsError::is_a_directory(path.display().to_string()));
        }

        let mut data = Vec::with_capacity(meta.len() as usize);
        file.read_to_end(&mut data).await?;

        let attr = FileAttr {
            size: data.len() as u64,
            ..FileAttr::from_metadata(&meta)
        };
        Ok(FileSnapshot { data, attr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn site(files: &[(&str, &str)]) -> (TempDir, LocalBackend) {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let host = dir.path().join(path);
            std::fs::create_dir_all(host.parent().unwrap()).unwrap();
            std::fs::write(host, content).unwrap();
        }
        let backend = LocalBackend::new(dir.path());
        (dir, backend)
    }

    #[tokio::test]
    async fn test_reads_with_and_without_leading_slash() {
        let (_dir, vfs) = site(&[("css/site.css", "a { color: red }")]);

        assert_eq!(
            vfs.read_all(Path::new("/css/site.css")).await.unwrap(),
            b"a { color: red }"
        );
        assert_eq!(vfs.read(Path::new("css/site.css"), 4, 5).await.unwrap(), b"color");
    }

    #[tokio::test]
    async fn test_listing_sorted_with_kinds() {
        let (_dir, vfs) = site(&[("z.txt", ""), ("a/inner.txt", ""), ("m.txt", "")]);

        assert_eq!(
            vfs.readdir(Path::new("")).await.unwrap(),
            vec![
                DirEntry::directory("a"),
                DirEntry::file("m.txt"),
                DirEntry::file("z.txt"),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_path() {
        let (_dir, vfs) = site(&[]);

        assert!(vfs.getattr(Path::new("nope.txt")).await.unwrap_err().is_not_found());
        assert!(vfs.snapshot(Path::new("nope.txt")).await.unwrap_err().is_not_found());
        assert!(!vfs.exists(Path::new("nope.txt")).await);
    }

    #[tokio::test]
    async fn test_parent_escape_rejected() {
        let outer = TempDir::new().unwrap();
        std::fs::write(outer.path().join("secret.txt"), "s").unwrap();
        std::fs::create_dir(outer.path().join("root")).unwrap();
        let vfs = LocalBackend::new(outer.path().join("root"));

        let err = vfs.read(Path::new("../secret.txt"), 0, 10).await.unwrap_err();
        assert!(matches!(err, VfsError::PathEscapesRoot(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let (dir, vfs) = site(&[]);
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link"))
            .unwrap();

        let err = vfs.getattr(Path::new("link")).await.unwrap_err();
        assert!(matches!(err, VfsError::PathEscapesRoot(_)));
    }

    #[tokio::test]
    async fn test_snapshot_agrees_with_getattr() {
        let (_dir, vfs) = site(&[("page.html", "<html></html>")]);

        let snap = vfs.snapshot(Path::new("page.html")).await.unwrap();
        let attr = vfs.getattr(Path::new("page.html")).await.unwrap();
        assert_eq!(snap.data, b"<html></html>");
        assert_eq!(snap.attr, attr);
    }

    #[tokio::test]
    async fn test_snapshot_of_directory() {
        let (_dir, vfs) = site(&[("sub/x", "")]);

        let err = vfs.snapshot(Path::new("sub")).await.unwrap_err();
        assert!(matches!(err, VfsError::IsADirectory(_)));
    }

    #[tokio::test]
    async fn test_watch_sees_rewrite() {
        let (dir, vfs) = site(&[("watched.txt", "v1")]);

        let mut sub = vfs.watch("watched.txt").await.unwrap();
        let mut unrelated = vfs.watch("other.txt").await.unwrap();
        std::fs::write(dir.path().join("watched.txt"), "v2").unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(10), sub.changed())
            .await
            .expect("no change notification within timeout");
        assert!(changed);
        assert!(!unrelated.drain());
    }
}
