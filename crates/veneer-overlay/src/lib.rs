//! # veneer-overlay
//!
//! Overlay namespace: serve transformed copies of selected source files
//! while keeping their size and modification time accurate.
//!
//! - [`OverlayNamespace`] - wraps a source [`VfsOps`](veneer_vfs::VfsOps), routes
//!   lookups of materialized paths to staged copies
//! - [`OverlayEntry`] - one staged copy and its transform pipeline
//! - [`Transform`] / [`TransformSpec`] - content transforms, programmatic or
//!   declarative
//! - [`OverlayConfig`] - TOML configuration
//!
//! ## Design Decisions
//!
//! - **Replay from source**: a refresh folds the whole pipeline over fresh
//!   source content, never over the previous staged output.
//! - **Rename-based replace**: staged files are only ever replaced by
//!   renaming a fully written temporary file over them, so readers see
//!   either the old or the new content.
//! - **Refresh never raises**: failures are logged and broadcast as
//!   [`RefreshEvent`]s; the staged copy stays at its last good state.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use veneer_overlay::{MaterializeOptions, OverlayNamespace, base_href};
//! use veneer_vfs::LocalBackend;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Arc::new(LocalBackend::new("./public"));
//! let overlay = OverlayNamespace::new(source)?;
//!
//! let entry = overlay
//!     .materialize_with("index.html", MaterializeOptions::new().auto_refresh(true))
//!     .await?;
//! entry.append_transform(base_href("/app/")).await?;
//!
//! let handle = overlay.lookup("index.html").await;
//! assert!(handle.is_overlay());
//! # Ok(())
//! # }
//! ```

mod config;
mod encoding;
mod entry;
mod error;
mod handle;
mod html;
mod namespace;
mod path;
mod refresh;
mod staging;
mod transform;

pub use config::{DEFAULT_EVENT_CAPACITY, DEFAULT_REFRESH_DEBOUNCE_MS, EntryConfig, OverlayConfig};
pub use encoding::TextEncoding;
pub use entry::{MaterializeOptions, OverlayEntry};
pub use error::{OverlayError, OverlayResult};
pub use handle::FileHandle;
pub use html::base_href;
pub use namespace::OverlayNamespace;
pub use path::OverlayPath;
pub use refresh::{RefreshEvent, RefreshOutcome};
pub use transform::{Transform, TransformPipeline, TransformSpec};
