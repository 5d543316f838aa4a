//! Change subscriptions.
//!
//! A subscription is bound to a glob pattern over normalized, `/`-separated
//! paths relative to the backend root. Notifications carry no payload: a
//! subscriber only learns that *something* matching its pattern changed and
//! is expected to re-read whatever it cares about.
//!
//! Each subscription buffers at most one pending notification. A burst of
//! changes arriving faster than the subscriber consumes them collapses into
//! a single wake-up, which is enough for re-read semantics.

use std::path::{Component, Path};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glob::{MatchOptions, Pattern};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{VfsError, VfsResult};

/// Normalize a backend-relative path into the `a/b/c` form patterns match
/// against. Leading separators, `.` and `..` components are dropped.
pub fn watch_key(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    parts.join("/")
}

/// Receiving side of a change subscription.
///
/// Dropping the subscription (or calling [`cancel`](Self::cancel)) stops
/// delivery; backends prune closed subscriptions lazily.
pub struct ChangeSubscription {
    pattern: String,
    rx: mpsc::Receiver<()>,
    cancelled: Arc<AtomicBool>,
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("pattern", &self.pattern)
            .finish()
    }
}

impl ChangeSubscription {
    fn new(pattern: String, rx: mpsc::Receiver<()>, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            pattern,
            rx,
            cancelled,
        }
    }

    /// The pattern this subscription was created with.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Wait for the next change notification.
    ///
    /// Returns `false` once the producing side is gone and no further
    /// notification can arrive.
    pub async fn changed(&mut self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        self.rx.recv().await.is_some()
    }

    /// Consume a pending notification without waiting. Returns whether one
    /// was pending.
    pub fn drain(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }

    /// Handle that cancels this subscription from elsewhere, e.g. while a
    /// task is parked in [`changed`](Self::changed).
    pub fn canceller(&self) -> SubscriptionCanceller {
        SubscriptionCanceller {
            cancelled: self.cancelled.clone(),
        }
    }

    /// Cancel the subscription.
    pub fn cancel(mut self) {
        self.cancelled.store(true, Ordering::Release);
        self.rx.close();
    }
}

/// Cancels a [`ChangeSubscription`] without owning it.
///
/// Cancellation takes effect immediately on the producing side: the
/// subscription stops matching and is pruned on the next registry access.
#[derive(Debug, Clone)]
pub struct SubscriptionCanceller {
    cancelled: Arc<AtomicBool>,
}

impl SubscriptionCanceller {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct Subscriber {
    pattern: Pattern,
    tx: mpsc::Sender<()>,
    cancelled: Arc<AtomicBool>,
}

impl Subscriber {
    fn is_live(&self) -> bool {
        !self.tx.is_closed() && !self.cancelled.load(Ordering::Acquire)
    }
}

/// Pattern → subscriber fan-out shared by backends.
///
/// `notify` is synchronous and non-blocking so it can be called from an OS
/// watcher callback thread as well as from async code.
#[derive(Default)]
pub struct WatchRegistry {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn match_options() -> MatchOptions {
        MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        }
    }

    /// Register a new subscriber for `pattern`.
    pub fn subscribe(&self, pattern: &str) -> VfsResult<ChangeSubscription> {
        let normalized = watch_key(Path::new(pattern));
        let compiled = Pattern::new(&normalized).map_err(|e| VfsError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.msg.to_string(),
        })?;

        let (tx, rx) = mpsc::channel(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        self.subscribers.lock().push(Subscriber {
            pattern: compiled,
            tx,
            cancelled: cancelled.clone(),
        });

        tracing::debug!(pattern = %normalized, "change subscription registered");
        Ok(ChangeSubscription::new(normalized, rx, cancelled))
    }

    /// Deliver a change for `path` to every matching subscriber. Returns the
    /// number of subscribers that matched.
    pub fn notify(&self, path: &Path) -> usize {
        let key = watch_key(path);
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(Subscriber::is_live);

        let mut matched = 0;
        for subscriber in subscribers.iter() {
            if subscriber.pattern.matches_with(&key, Self::match_options()) {
                matched += 1;
                // Full means a notification is already pending: coalesce.
                let _ = subscriber.tx.try_send(());
            }
        }
        matched
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(Subscriber::is_live);
        subscribers.len()
    }

    /// True if no live subscriber remains.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_watch_key_normalizes() {
        assert_eq!(watch_key(Path::new("/a/b.txt")), "a/b.txt");
        assert_eq!(watch_key(Path::new("a/./b.txt")), "a/b.txt");
        assert_eq!(watch_key(Path::new("a/../b.txt")), "b.txt");
        assert_eq!(watch_key(Path::new("")), "");
    }

    #[tokio::test]
    async fn test_exact_pattern_notifies() {
        let registry = WatchRegistry::new();
        let mut sub = registry.subscribe("/site/index.html").unwrap();
        assert_eq!(sub.pattern(), "site/index.html");

        assert_eq!(registry.notify(Path::new("site/index.html")), 1);
        assert_eq!(registry.notify(Path::new("site/other.html")), 0);

        let got = tokio::time::timeout(Duration::from_secs(1), sub.changed())
            .await
            .unwrap();
        assert!(got);
    }

    #[tokio::test]
    async fn test_glob_pattern_single_segment() {
        let registry = WatchRegistry::new();
        let _sub = registry.subscribe("site/*.html").unwrap();

        assert_eq!(registry.notify(Path::new("site/a.html")), 1);
        assert_eq!(registry.notify(Path::new("site/deep/a.html")), 0);
    }

    #[tokio::test]
    async fn test_notifications_coalesce() {
        let registry = WatchRegistry::new();
        let mut sub = registry.subscribe("a.txt").unwrap();

        for _ in 0..10 {
            registry.notify(Path::new("a.txt"));
        }

        assert!(sub.drain());
        assert!(!sub.drain());
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let registry = WatchRegistry::new();
        let sub = registry.subscribe("a.txt").unwrap();
        assert_eq!(registry.len(), 1);

        sub.cancel();
        assert!(registry.is_empty());
        assert_eq!(registry.notify(Path::new("a.txt")), 0);
    }

    #[tokio::test]
    async fn test_canceller_stops_delivery() {
        let registry = WatchRegistry::new();
        let mut sub = registry.subscribe("a.txt").unwrap();
        let canceller = sub.canceller();

        canceller.cancel();
        assert!(canceller.is_cancelled());
        assert!(registry.is_empty());
        assert_eq!(registry.notify(Path::new("a.txt")), 0);
        assert!(!sub.changed().await);
    }

    #[test]
    fn test_invalid_pattern() {
        let registry = WatchRegistry::new();
        let err = registry.subscribe("a/[b").unwrap_err();
        assert!(matches!(err, VfsError::InvalidPattern { .. }));
    }
}
