//! Materialized overlay entries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use veneer_vfs::{FileSnapshot, VfsOps};

use crate::encoding::TextEncoding;
use crate::error::{OverlayError, OverlayResult};
use crate::path::OverlayPath;
use crate::refresh::RefreshOutcome;
use crate::staging::{self, Liveness};
use crate::transform::{Transform, TransformPipeline};

/// Options fixed when a path is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializeOptions {
    /// Re-materialize whenever the source changes.
    pub auto_refresh: bool,
    /// Stamp the staged file with the source's modification time.
    pub preserve_timestamp: bool,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            auto_refresh: false,
            preserve_timestamp: true,
        }
    }
}

impl MaterializeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_refresh(mut self, enabled: bool) -> Self {
        self.auto_refresh = enabled;
        self
    }

    pub fn preserve_timestamp(mut self, enabled: bool) -> Self {
        self.preserve_timestamp = enabled;
        self
    }
}

/// One materialized, possibly transformed copy of a source file.
///
/// The pipeline lock also serializes every write to the staged file, so an
/// `append_transform` and a refresh of the same entry never interleave.
pub struct OverlayEntry {
    path: OverlayPath,
    staging_path: PathBuf,
    options: MaterializeOptions,
    pipeline: Mutex<TransformPipeline>,
    source: Arc<dyn VfsOps>,
    liveness: Arc<Liveness>,
}

impl std::fmt::Debug for OverlayEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayEntry")
            .field("path", &self.path)
            .field("staging_path", &self.staging_path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl OverlayEntry {
    pub(crate) fn new(
        path: OverlayPath,
        staging_path: PathBuf,
        options: MaterializeOptions,
        source: Arc<dyn VfsOps>,
        liveness: Arc<Liveness>,
    ) -> Self {
        Self {
            path,
            staging_path,
            options,
            pipeline: Mutex::new(TransformPipeline::new()),
            source,
            liveness,
        }
    }

    /// Normalized path of the entry within the namespace.
    pub fn path(&self) -> &OverlayPath {
        &self.path
    }

    /// Absolute location of the staged copy.
    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    pub fn options(&self) -> MaterializeOptions {
        self.options
    }

    pub async fn transform_count(&self) -> usize {
        self.pipeline.lock().await.len()
    }

    /// Names of the recorded transforms, in application order.
    pub async fn transform_names(&self) -> Vec<String> {
        self.pipeline.lock().await.names()
    }

    /// Record `transform` and apply it to the current staged content.
    ///
    /// The transform composes on top of the staged text, not the original
    /// source. When timestamps are preserved the staged file keeps the
    /// modification time it had before the call. On return the staged file
    /// reflects the transform. On error nothing is recorded.
    pub async fn append_transform(&self, transform: impl Into<Transform>) -> OverlayResult<()> {
        let transform = transform.into();
        let mut pipeline = self.pipeline.lock().await;
        if !self.liveness.is_alive() {
            return Err(OverlayError::Closed);
        }

        let bytes = tokio::fs::read(&self.staging_path).await?;
        let mtime = tokio::fs::metadata(&self.staging_path).await?.modified()?;

        let (text, encoding) = TextEncoding::decode(&bytes);
        let data = encoding.encode(&transform.apply(&text));

        let mtime = self.options.preserve_timestamp.then_some(mtime);
        let replaced =
            staging::replace(self.liveness.clone(), self.staging_path.clone(), data, mtime).await?;
        if !replaced {
            return Err(OverlayError::Closed);
        }
        pipeline.push(transform.clone());

        tracing::debug!(
            path = %self.path,
            transform = transform.name(),
            steps = pipeline.len(),
            "applied transform"
        );
        Ok(())
    }

    /// Write the first copy from `snapshot`. Returns `false` if the
    /// namespace was torn down meanwhile.
    pub(crate) async fn stage_initial(&self, snapshot: FileSnapshot) -> OverlayResult<bool> {
        let pipeline = self.pipeline.lock().await;
        Ok(self.write_from_source(&pipeline, snapshot).await?)
    }

    /// Re-derive the staged copy from the current source and the full
    /// pipeline. Never fails; the outcome says what happened.
    pub(crate) async fn refresh(&self) -> RefreshOutcome {
        let pipeline = self.pipeline.lock().await;
        if !self.liveness.is_alive() {
            return RefreshOutcome::Abandoned;
        }

        let snapshot = match self.source.snapshot(self.path.as_path()).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_not_found() => return RefreshOutcome::SourceMissing,
            Err(e) => return RefreshOutcome::Failed(e.to_string()),
        };

        match self.write_from_source(&pipeline, snapshot).await {
            Ok(true) => RefreshOutcome::Refreshed,
            Ok(false) => RefreshOutcome::Abandoned,
            Err(e) => RefreshOutcome::Failed(e.to_string()),
        }
    }

    async fn write_from_source(
        &self,
        pipeline: &TransformPipeline,
        snapshot: FileSnapshot,
    ) -> std::io::Result<bool> {
        let mtime: Option<SystemTime> = self
            .options
            .preserve_timestamp
            .then_some(snapshot.mtime());
        let data = render(pipeline, snapshot.data);
        staging::replace(self.liveness.clone(), self.staging_path.clone(), data, mtime).await
    }
}

/// Fold `pipeline` over raw source bytes. An empty pipeline passes the
/// bytes through untouched.
fn render(pipeline: &TransformPipeline, bytes: Vec<u8>) -> Vec<u8> {
    if pipeline.is_empty() {
        return bytes;
    }
    let (text, encoding) = TextEncoding::decode(&bytes);
    encoding.encode(&pipeline.apply(&text))
}
