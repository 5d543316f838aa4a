//! TOML configuration for an overlay namespace.
//!
//! ```toml
//! staging_root = "/var/cache/veneer"   # optional; a temp dir otherwise
//! refresh_debounce_ms = 25
//!
//! [[overlay]]
//! path = "index.html"
//! auto_refresh = true
//!
//! [[overlay.transform]]
//! kind = "base_href"
//! href = "/app/"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entry::MaterializeOptions;
use crate::error::{OverlayError, OverlayResult};
use crate::path::OverlayPath;
use crate::transform::TransformSpec;

pub const DEFAULT_REFRESH_DEBOUNCE_MS: u64 = 25;
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Namespace-wide settings plus the overlays to materialize at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Caller-owned staging directory. When unset the namespace creates
    /// (and later deletes) a temporary one.
    pub staging_root: Option<PathBuf>,
    /// Quiet period after a source change before refreshing.
    pub refresh_debounce_ms: u64,
    /// Buffered refresh events per subscriber.
    pub event_capacity: usize,
    #[serde(rename = "overlay")]
    pub overlays: Vec<EntryConfig>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            staging_root: None,
            refresh_debounce_ms: DEFAULT_REFRESH_DEBOUNCE_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            overlays: Vec::new(),
        }
    }
}

/// One `[[overlay]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryConfig {
    pub path: String,
    #[serde(default)]
    pub auto_refresh: bool,
    #[serde(default = "default_true")]
    pub preserve_timestamp: bool,
    #[serde(default, rename = "transform")]
    pub transforms: Vec<TransformSpec>,
}

fn default_true() -> bool {
    true
}

impl EntryConfig {
    pub fn options(&self) -> MaterializeOptions {
        MaterializeOptions {
            auto_refresh: self.auto_refresh,
            preserve_timestamp: self.preserve_timestamp,
        }
    }
}

impl OverlayConfig {
    /// Parse and validate configuration text.
    pub fn from_toml_str(text: &str) -> OverlayResult<Self> {
        let config: OverlayConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> OverlayResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| OverlayError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(
            path = %path.display(),
            overlays = config.overlays.len(),
            "loaded overlay config"
        );
        Ok(config)
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }

    /// Check everything that can be checked without touching the source.
    pub fn validate(&self) -> OverlayResult<()> {
        if self.event_capacity == 0 {
            return Err(OverlayError::Config(
                "event_capacity must be at least 1".into(),
            ));
        }
        for overlay in &self.overlays {
            OverlayPath::new(&overlay.path)
                .map_err(|e| OverlayError::Config(format!("overlay {:?}: {e}", overlay.path)))?;
            for spec in &overlay.transforms {
                spec.build().map_err(|e| {
                    OverlayError::Config(format!("overlay {:?}: {e}", overlay.path))
                })?;
            }
        }
        Ok(())
    }
}
