//! Normalized overlay paths.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{OverlayError, OverlayResult};

/// A path relative to the namespace root, in platform-neutral form.
///
/// Leading separators are stripped, `\` becomes `/`, and `.` or empty
/// segments are dropped. `..` is rejected rather than resolved so a path can
/// never name something outside the staging root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverlayPath {
    normalized: String,
}

impl OverlayPath {
    pub fn new(path: impl AsRef<Path>) -> OverlayResult<Self> {
        let raw = path.as_ref().to_string_lossy().replace('\\', "/");

        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    return Err(OverlayError::invalid_argument(format!(
                        "path {raw:?} contains a parent reference"
                    )));
                }
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            return Err(OverlayError::invalid_argument(format!(
                "path {raw:?} does not name a file"
            )));
        }

        Ok(Self {
            normalized: segments.join("/"),
        })
    }

    /// The normalized `a/b/c` form.
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.normalized)
    }

    /// Case-insensitive lookup key.
    pub fn key(&self) -> String {
        self.normalized.to_lowercase()
    }

    /// Location of this path under `root`, using the host separator.
    pub fn under(&self, root: &Path) -> PathBuf {
        self.normalized
            .split('/')
            .fold(root.to_path_buf(), |acc, segment| acc.join(segment))
    }

    /// Watch pattern matching exactly this path.
    pub fn watch_pattern(&self) -> String {
        glob::Pattern::escape(&self.normalized)
    }
}

impl fmt::Display for OverlayPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}
