//! Auto-refresh workers.
//!
//! Each auto-refresh entry gets one task that waits on the source change
//! subscription and re-derives the staged copy. Failures stay inside the
//! task: they are logged and broadcast as [`RefreshEvent`]s, and the staged
//! copy keeps its previous content until the next change.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use veneer_vfs::{ChangeSubscription, SubscriptionCanceller};

use crate::entry::OverlayEntry;
use crate::path::OverlayPath;

/// Result of one refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The staged copy now reflects the current source.
    Refreshed,
    /// The source file is gone; the staged copy was left as it was.
    SourceMissing,
    /// Reading the source or writing the staged copy failed.
    Failed(String),
    /// The namespace was torn down before the replace.
    Abandoned,
}

/// Broadcast after every refresh attempt.
#[derive(Debug, Clone)]
pub struct RefreshEvent {
    pub path: OverlayPath,
    pub outcome: RefreshOutcome,
}

/// Handle to a running refresh task.
pub(crate) struct RefreshWorker {
    canceller: SubscriptionCanceller,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RefreshWorker {
    /// Spawn the worker. `subscription` must already be established so no
    /// change between the initial copy and the first wait is lost.
    pub(crate) fn spawn(
        entry: Arc<OverlayEntry>,
        subscription: ChangeSubscription,
        debounce: Duration,
        events: broadcast::Sender<RefreshEvent>,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let canceller = subscription.canceller();

        let task = tokio::spawn(async move {
            let mut subscription = subscription;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        tracing::debug!(path = %entry.path(), "refresh worker shutting down");
                        break;
                    }
                    changed = subscription.changed() => {
                        if !changed {
                            tracing::debug!(path = %entry.path(), "source watch closed");
                            break;
                        }

                        // Trailing debounce: a burst collapses into the one
                        // notification buffered while we sleep.
                        if !debounce.is_zero() {
                            tokio::time::sleep(debounce).await;
                            subscription.drain();
                        }

                        let outcome = entry.refresh().await;
                        match &outcome {
                            RefreshOutcome::Refreshed => {
                                tracing::debug!(path = %entry.path(), "refreshed overlay");
                            }
                            RefreshOutcome::SourceMissing => {
                                tracing::debug!(path = %entry.path(), "source missing, keeping staged copy");
                            }
                            RefreshOutcome::Failed(error) => {
                                tracing::warn!(
                                    path = %entry.path(),
                                    error = %error,
                                    "refresh failed, keeping staged copy"
                                );
                            }
                            RefreshOutcome::Abandoned => {
                                tracing::debug!(path = %entry.path(), "refresh abandoned after teardown");
                            }
                        }

                        let done = outcome == RefreshOutcome::Abandoned;
                        let _ = events.send(RefreshEvent {
                            path: entry.path().clone(),
                            outcome,
                        });
                        if done {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            canceller,
            shutdown_tx,
            task,
        }
    }

    /// Stop the worker. The source subscription is cancelled before this
    /// returns; a refresh already past its liveness check may still finish
    /// its rename.
    pub(crate) fn stop(self) {
        self.canceller.cancel();
        let _ = self.shutdown_tx.send(());
        self.task.abort();
    }
}
