//! Staging area: where materialized copies live, and how they are replaced.
//!
//! Every write to a staged file goes through [`replace`]: the new bytes land
//! in a temporary file in the same directory and are renamed over the target.
//! A reader that opened the staged file before the rename keeps reading the
//! old inode; a reader opening after sees the complete new content.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tempfile::TempDir;

/// Namespace liveness flag.
///
/// Renames into the staging area run under the read side; teardown flips
/// the flag under the write side. Once [`shut_down`](Self::shut_down)
/// returns, no rename can start, and any rename already in progress has
/// completed.
#[derive(Debug)]
pub(crate) struct Liveness {
    alive: RwLock<bool>,
}

impl Liveness {
    pub(crate) fn new() -> Self {
        Self {
            alive: RwLock::new(true),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        *self.alive.read()
    }

    /// Run `f` only while the namespace is alive, holding off teardown
    /// until it returns.
    pub(crate) fn run_if_alive<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        let alive = self.alive.read();
        if *alive { Some(f()) } else { None }
    }

    /// Mark the namespace dead. Returns whether it was alive before.
    pub(crate) fn shut_down(&self) -> bool {
        let mut alive = self.alive.write();
        std::mem::replace(&mut *alive, false)
    }
}

/// Root directory of the staging area.
#[derive(Debug)]
pub(crate) enum StagingRoot {
    /// Created by the namespace; deleted wholesale at teardown.
    Owned(TempDir),
    /// Handed in by the caller; only staged files are removed at teardown.
    Borrowed(PathBuf),
}

impl StagingRoot {
    pub(crate) fn owned() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("veneer-").tempdir()?;
        Ok(StagingRoot::Owned(dir))
    }

    pub(crate) fn borrowed(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(StagingRoot::Borrowed(dir))
    }

    pub(crate) fn path(&self) -> &Path {
        match self {
            StagingRoot::Owned(dir) => dir.path(),
            StagingRoot::Borrowed(dir) => dir,
        }
    }

    /// Remove staged state. Best effort: failures are logged, never raised.
    pub(crate) fn remove(self, staged: &[PathBuf]) {
        match self {
            StagingRoot::Owned(dir) => {
                let path = dir.path().to_path_buf();
                if let Err(e) = dir.close() {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to remove staging root"
                    );
                }
            }
            StagingRoot::Borrowed(_) => {
                for file in staged {
                    match std::fs::remove_file(file) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => tracing::warn!(
                            path = %file.display(),
                            error = %e,
                            "failed to remove staged file"
                        ),
                    }
                }
            }
        }
    }
}

/// Create the directories above `target`. Returns `Ok(false)` without
/// touching the filesystem once the namespace is torn down, so a deleted
/// staging root is never recreated.
pub(crate) async fn create_parent(liveness: Arc<Liveness>, target: PathBuf) -> io::Result<bool> {
    tokio::task::spawn_blocking(move || {
        let Some(parent) = target.parent() else {
            return Ok(liveness.is_alive());
        };
        match liveness.run_if_alive(|| std::fs::create_dir_all(parent)) {
            Some(result) => result.map(|()| true),
            None => Ok(false),
        }
    })
    .await
    .map_err(io::Error::other)?
}

/// Atomically replace `target` with `data`.
///
/// The temporary file is created next to `target`, so the parent directory
/// must already exist. With `mtime` set, the temporary file is stamped
/// before the rename and the staged file never shows any other time.
///
/// Returns `Ok(false)` when the namespace was torn down and the replace
/// was abandoned; the temporary file is discarded in that case.
pub(crate) async fn replace(
    liveness: Arc<Liveness>,
    target: PathBuf,
    data: Vec<u8>,
    mtime: Option<SystemTime>,
) -> io::Result<bool> {
    tokio::task::spawn_blocking(move || {
        let result = replace_blocking(&liveness, &target, &data, mtime);
        match result {
            // The staging root disappears at teardown; failing to write
            // into it then is an abandoned replace, not an error.
            Err(_) if !liveness.is_alive() => Ok(false),
            other => other,
        }
    })
    .await
    .map_err(io::Error::other)?
}

fn replace_blocking(
    liveness: &Liveness,
    target: &Path,
    data: &[u8],
    mtime: Option<SystemTime>,
) -> io::Result<bool> {
    if !liveness.is_alive() {
        return Ok(false);
    }

    let dir = target.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("staged path has no parent: {}", target.display()),
        )
    })?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".veneer-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_data()?;
    if let Some(mtime) = mtime {
        tmp.as_file().set_modified(mtime)?;
    }

    match liveness.run_if_alive(move || tmp.persist(target)) {
        Some(Ok(_)) => Ok(true),
        Some(Err(e)) => Err(e.error),
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn whole_seconds(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_liveness_shut_down_once() {
        let liveness = Liveness::new();
        assert!(liveness.is_alive());
        assert_eq!(liveness.run_if_alive(|| 7), Some(7));

        assert!(liveness.shut_down());
        assert!(!liveness.shut_down());
        assert!(!liveness.is_alive());
        assert_eq!(liveness.run_if_alive(|| 7), None);
    }

    #[tokio::test]
    async fn test_replace_writes_and_stamps() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("index.html");
        std::fs::write(&target, b"old").unwrap();

        let liveness = Arc::new(Liveness::new());
        let mtime = whole_seconds(1_600_000_000);
        let replaced = replace(liveness, target.clone(), b"new content".to_vec(), Some(mtime))
            .await
            .unwrap();

        assert!(replaced);
        assert_eq!(std::fs::read(&target).unwrap(), b"new content");
        assert_eq!(std::fs::metadata(&target).unwrap().modified().unwrap(), mtime);
    }

    #[tokio::test]
    async fn test_replace_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.txt");

        let liveness = Arc::new(Liveness::new());
        for i in 0..5 {
            replace(liveness.clone(), target.clone(), vec![b'x'; i], None)
                .await
                .unwrap();
        }

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a.txt")]);
    }

    #[tokio::test]
    async fn test_replace_after_shut_down_is_abandoned() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.txt");
        std::fs::write(&target, b"kept").unwrap();

        let liveness = Arc::new(Liveness::new());
        liveness.shut_down();

        let replaced = replace(liveness, target.clone(), b"dropped".to_vec(), None)
            .await
            .unwrap();
        assert!(!replaced);
        assert_eq!(std::fs::read(&target).unwrap(), b"kept");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_replace_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("gone").join("a.txt");

        let liveness = Arc::new(Liveness::new());
        let result = replace(liveness, target, b"x".to_vec(), None).await;
        assert!(result.is_err());
        assert!(!dir.path().join("gone").exists());
    }

    #[tokio::test]
    async fn test_create_parent_only_while_alive() {
        let dir = TempDir::new().unwrap();
        let liveness = Arc::new(Liveness::new());

        let target = dir.path().join("a").join("b.txt");
        assert!(create_parent(liveness.clone(), target).await.unwrap());
        assert!(dir.path().join("a").is_dir());

        liveness.shut_down();
        let target = dir.path().join("late").join("b.txt");
        assert!(!create_parent(liveness, target).await.unwrap());
        assert!(!dir.path().join("late").exists());
    }

    #[test]
    fn test_borrowed_root_keeps_directory() {
        let dir = TempDir::new().unwrap();
        let root = StagingRoot::borrowed(dir.path().join("stage")).unwrap();
        let staged = root.path().join("a.txt");
        std::fs::write(&staged, b"x").unwrap();

        root.remove(&[staged.clone(), dir.path().join("stage/never-created")]);
        assert!(!staged.exists());
        assert!(dir.path().join("stage").is_dir());
    }

    #[test]
    fn test_owned_root_is_deleted() {
        let root = StagingRoot::owned().unwrap();
        let path = root.path().to_path_buf();
        std::fs::create_dir_all(path.join("nested")).unwrap();
        std::fs::write(path.join("nested/a.txt"), b"x").unwrap();

        root.remove(&[]);
        assert!(!path.exists());
    }
}
