//! The overlay namespace.
//!
//! Wraps a source [`VfsOps`] and redirects lookups of materialized paths to
//! their staged copies. Everything else, including directory listings and
//! change subscriptions, passes straight through to the source.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use veneer_vfs::{
    ChangeSubscription, DirEntry, FileAttr, FileSnapshot, VfsError, VfsOps, VfsResult,
};

use crate::config::{DEFAULT_EVENT_CAPACITY, DEFAULT_REFRESH_DEBOUNCE_MS, OverlayConfig};
use crate::entry::{MaterializeOptions, OverlayEntry};
use crate::error::{OverlayError, OverlayResult};
use crate::handle::FileHandle;
use crate::path::OverlayPath;
use crate::refresh::{RefreshEvent, RefreshWorker};
use crate::staging::{self, Liveness, StagingRoot};

/// A namespace that serves transformed copies for selected paths.
///
/// Dropping the namespace tears it down.
pub struct OverlayNamespace {
    source: Arc<dyn VfsOps>,
    staging_path: PathBuf,
    /// Taken at teardown.
    staging: Mutex<Option<StagingRoot>>,
    /// Keyed by [`OverlayPath::key`].
    entries: RwLock<HashMap<String, Arc<OverlayEntry>>>,
    workers: Mutex<Vec<RefreshWorker>>,
    liveness: Arc<Liveness>,
    /// Serializes materialize calls.
    materialize_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<RefreshEvent>,
    refresh_debounce: Duration,
}

impl std::fmt::Debug for OverlayNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayNamespace")
            .field("staging_root", &self.staging_path)
            .field("entries", &self.entries.read().len())
            .field("alive", &self.liveness.is_alive())
            .finish()
    }
}

impl OverlayNamespace {
    /// Create a namespace over `source` with its own temporary staging
    /// root, deleted at teardown.
    pub fn new(source: Arc<dyn VfsOps>) -> OverlayResult<Self> {
        Ok(Self::build(source, StagingRoot::owned()?))
    }

    /// Create a namespace staging into `dir`, created if needed. The
    /// directory belongs to the caller: teardown removes the staged files
    /// but leaves the directory.
    pub fn with_staging_root(source: Arc<dyn VfsOps>, dir: impl Into<PathBuf>) -> OverlayResult<Self> {
        Ok(Self::build(source, StagingRoot::borrowed(dir)?))
    }

    /// Build a namespace from configuration and materialize every overlay
    /// it declares, with its transforms applied.
    pub async fn from_config(source: Arc<dyn VfsOps>, config: &OverlayConfig) -> OverlayResult<Self> {
        config.validate()?;

        let namespace = match &config.staging_root {
            Some(dir) => Self::with_staging_root(source, dir)?,
            None => Self::new(source)?,
        }
        .with_refresh_debounce(config.refresh_debounce())
        .with_event_capacity(config.event_capacity);

        for overlay in &config.overlays {
            let entry = namespace
                .materialize_with(&overlay.path, overlay.options())
                .await?;
            for spec in &overlay.transforms {
                entry.append_transform(spec.build()?).await?;
            }
        }

        Ok(namespace)
    }

    fn build(source: Arc<dyn VfsOps>, staging: StagingRoot) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        let staging_path = staging.path().to_path_buf();
        tracing::info!(staging_root = %staging_path.display(), "overlay namespace created");

        Self {
            source,
            staging_path,
            staging: Mutex::new(Some(staging)),
            entries: RwLock::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            liveness: Arc::new(Liveness::new()),
            materialize_lock: tokio::sync::Mutex::new(()),
            events,
            refresh_debounce: Duration::from_millis(DEFAULT_REFRESH_DEBOUNCE_MS),
        }
    }

    /// Quiet period between a source change and the refresh it triggers.
    /// Applies to entries materialized afterwards.
    pub fn with_refresh_debounce(mut self, debounce: Duration) -> Self {
        self.refresh_debounce = debounce;
        self
    }

    /// Capacity of the refresh event channel. Existing event receivers are
    /// disconnected.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        self.events = events;
        self
    }

    /// Materialize `path` with default options.
    pub async fn materialize(&self, path: impl AsRef<Path>) -> OverlayResult<Arc<OverlayEntry>> {
        self.materialize_with(path, MaterializeOptions::default())
            .await
    }

    /// Copy `path` from the source into the staging area and start serving
    /// lookups of it from there.
    ///
    /// Materializing an already materialized path returns the existing
    /// entry when the options match, and fails with
    /// [`OverlayError::AlreadyMaterialized`] otherwise.
    pub async fn materialize_with(
        &self,
        path: impl AsRef<Path>,
        options: MaterializeOptions,
    ) -> OverlayResult<Arc<OverlayEntry>> {
        let _guard = self.materialize_lock.lock().await;
        if !self.liveness.is_alive() {
            return Err(OverlayError::Closed);
        }

        let path = OverlayPath::new(path)?;
        if let Some(existing) = self.entries.read().get(&path.key()).cloned() {
            if existing.options() == options {
                return Ok(existing);
            }
            return Err(OverlayError::AlreadyMaterialized(path.to_string()));
        }

        // Subscribe before copying so a change in between is not missed.
        let subscription = if options.auto_refresh {
            Some(self.source.watch(&path.watch_pattern()).await?)
        } else {
            None
        };

        let snapshot = self.source.snapshot(path.as_path()).await?;

        // Teardown may have run while the source was read.
        let staging_path = path.under(&self.staging_path);
        if !staging::create_parent(self.liveness.clone(), staging_path.clone()).await? {
            return Err(OverlayError::Closed);
        }

        let entry = Arc::new(OverlayEntry::new(
            path.clone(),
            staging_path,
            options,
            self.source.clone(),
            self.liveness.clone(),
        ));
        if !entry.stage_initial(snapshot).await? {
            return Err(OverlayError::Closed);
        }

        self.entries.write().insert(path.key(), entry.clone());
        if let Some(subscription) = subscription {
            self.start_worker(entry.clone(), subscription);
        }

        if !self.liveness.is_alive() {
            // Torn down while copying; the staged file was not seen by teardown.
            self.entries.write().remove(&path.key());
            match tokio::fs::remove_file(entry.staging_path()).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    path = %entry.staging_path().display(),
                    error = %e,
                    "failed to remove staged file"
                ),
            }
            return Err(OverlayError::Closed);
        }

        tracing::info!(
            path = %path,
            staged = %entry.staging_path().display(),
            auto_refresh = options.auto_refresh,
            preserve_timestamp = options.preserve_timestamp,
            "materialized overlay"
        );
        Ok(entry)
    }

    fn start_worker(&self, entry: Arc<OverlayEntry>, subscription: ChangeSubscription) {
        let mut workers = self.workers.lock();
        // Checked under the workers lock: teardown drains the list after
        // shutting down, so a worker pushed here is always stopped.
        if !self.liveness.is_alive() {
            return;
        }
        workers.push(RefreshWorker::spawn(
            entry,
            subscription,
            self.refresh_debounce,
            self.events.clone(),
        ));
    }

    /// Resolve `path` to its staged copy if it is materialized, otherwise
    /// to the source. Never fails: an unresolvable path yields a handle for
    /// which [`FileHandle::exists`] is false.
    pub async fn lookup(&self, path: impl AsRef<Path>) -> FileHandle {
        let path = path.as_ref();
        match self.route(path) {
            Some(entry) => FileHandle::staged(path, entry.staging_path().to_path_buf()).await,
            None => FileHandle::source(self.source.clone(), path).await,
        }
    }

    /// Directory listing from the source. Overlays never shadow listings.
    pub async fn list_directory(&self, path: impl AsRef<Path>) -> OverlayResult<Vec<DirEntry>> {
        Ok(self.source.readdir(path.as_ref()).await?)
    }

    /// Change subscription on the source.
    pub async fn watch(&self, pattern: &str) -> OverlayResult<ChangeSubscription> {
        Ok(self.source.watch(pattern).await?)
    }

    /// The entry materialized for `path`, if any.
    pub fn entry(&self, path: impl AsRef<Path>) -> Option<Arc<OverlayEntry>> {
        self.route(path.as_ref())
    }

    /// All entries, sorted by path.
    pub fn entries(&self) -> Vec<Arc<OverlayEntry>> {
        let mut entries: Vec<_> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.path().as_str().cmp(b.path().as_str()));
        entries
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_path
    }

    pub fn is_torn_down(&self) -> bool {
        !self.liveness.is_alive()
    }

    /// Receive an event for every refresh attempt.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RefreshEvent> {
        self.events.subscribe()
    }

    /// Stop all refresh workers and remove staged state. Idempotent.
    ///
    /// A refresh that passed its liveness check before this call may still
    /// finish its rename; none starts afterwards. Removal is best effort.
    pub fn teardown(&self) {
        if !self.liveness.shut_down() {
            return;
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            worker.stop();
        }

        let entries: Vec<Arc<OverlayEntry>> =
            self.entries.write().drain().map(|(_, entry)| entry).collect();
        let staged: Vec<PathBuf> = entries
            .iter()
            .map(|entry| entry.staging_path().to_path_buf())
            .collect();

        if let Some(staging) = self.staging.lock().take() {
            staging.remove(&staged);
        }

        tracing::info!(
            staging_root = %self.staging_path.display(),
            entries = entries.len(),
            "overlay namespace torn down"
        );
    }

    fn route(&self, path: &Path) -> Option<Arc<OverlayEntry>> {
        let path = OverlayPath::new(path).ok()?;
        self.entries.read().get(&path.key()).cloned()
    }
}

impl Drop for OverlayNamespace {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[async_trait]
impl VfsOps for OverlayNamespace {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        match self.route(path) {
            Some(entry) => {
                let handle = FileHandle::staged(path, entry.staging_path().to_path_buf()).await;
                handle
                    .attr()
                    .cloned()
                    .ok_or_else(|| VfsError::not_found(path.display().to_string()))
            }
            None => self.source.getattr(path).await,
        }
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        self.source.readdir(path).await
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        match self.route(path) {
            Some(entry) => {
                FileHandle::staged(path, entry.staging_path().to_path_buf())
                    .await
                    .read(offset, size)
                    .await
            }
            None => self.source.read(path, offset, size).await,
        }
    }

    async fn watch(&self, pattern: &str) -> VfsResult<ChangeSubscription> {
        self.source.watch(pattern).await
    }

    async fn snapshot(&self, path: &Path) -> VfsResult<FileSnapshot> {
        match self.route(path) {
            Some(entry) => {
                FileHandle::staged(path, entry.staging_path().to_path_buf())
                    .await
                    .snapshot()
                    .await
            }
            None => self.source.snapshot(path).await,
        }
    }
}
