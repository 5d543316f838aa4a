//! # veneer-vfs
//!
//! Read-only, path-based virtual filesystem contract for veneer.
//!
//! - [`VfsOps`] - lookup contract: attributes, listing, reads, change watch
//! - [`ChangeSubscription`] - cancellable "something changed" notifications
//! - [`WatchRegistry`] - pattern fan-out used by the backends
//! - [`LocalBackend`] - a real directory, watched with `notify`
//! - [`MemoryBackend`] - in-process files with explicit mutation
//!
//! ## Design Decisions
//!
//! - **Path-based, no handles**: operations take relative paths and explicit
//!   offsets, so wrappers can route a call without per-file state.
//! - **Payload-less notifications**: subscribers re-read on wake-up, which
//!   lets bursts of changes coalesce into one delivery.

pub mod backends;
mod error;
mod ops;
mod types;
mod watch;

pub use backends::{LocalBackend, MemoryBackend};
pub use error::{VfsError, VfsResult};
pub use ops::VfsOps;
pub use types::{DirEntry, FileAttr, FileSnapshot, FileType};
pub use watch::{ChangeSubscription, SubscriptionCanceller, WatchRegistry, watch_key};
