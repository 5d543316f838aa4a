//! Metadata shapes shared by backends and the overlay.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// What a path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    File,
    Directory,
    Symlink,
}

impl FileType {
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }

    /// Classify a host file type. Anything that is neither a directory nor
    /// a symlink counts as a file.
    pub fn from_std(ft: std::fs::FileType) -> Self {
        if ft.is_dir() {
            FileType::Directory
        } else if ft.is_symlink() {
            FileType::Symlink
        } else {
            FileType::File
        }
    }
}

/// Size, kind, permissions and modification time of a path.
///
/// `size` and `mtime` are what HTTP caching upstream keys on, so a staged
/// copy must report them exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttr {
    pub size: u64,
    pub kind: FileType,
    /// Unix mode bits, e.g. `0o644`.
    pub perm: u32,
    pub mtime: SystemTime,
}

impl FileAttr {
    /// Attributes of a regular file modified now.
    pub fn file(size: u64, perm: u32) -> Self {
        Self {
            size,
            kind: FileType::File,
            perm,
            mtime: SystemTime::now(),
        }
    }

    /// Attributes of a directory modified now.
    pub fn directory(perm: u32) -> Self {
        Self {
            size: 0,
            kind: FileType::Directory,
            perm,
            mtime: SystemTime::now(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        let perm = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode() & 0o7777
        };
        #[cfg(not(unix))]
        let perm = if meta.permissions().readonly() { 0o444 } else { 0o644 };

        Self {
            size: meta.len(),
            kind: FileType::from_std(meta.file_type()),
            perm,
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }
}

/// One name in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileType,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }
}

/// Full content of a file together with the attributes observed when it
/// was read.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub data: Vec<u8>,
    pub attr: FileAttr,
}

impl FileSnapshot {
    pub fn mtime(&self) -> SystemTime {
        self.attr.mtime
    }
}
