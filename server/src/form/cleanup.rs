//! Lifecycle Cleanup
//!
//! Deletes a submission's stored files once its message has been
//! dispatched. Cleanup runs on its own task, never blocks or fails the
//! dispatch path, and treats already-missing files as cleaned.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::dispatch::DispatchBus;
use super::storage::StoredFile;

/// Maps in-flight submissions to their stored file paths until cleanup.
#[derive(Debug, Clone, Default)]
pub struct SubmissionRegistry {
    entries: Arc<DashMap<Uuid, Vec<PathBuf>>>,
}

impl SubmissionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the stored file set for a submission.
    pub fn register(&self, submission_id: Uuid, stored: &[StoredFile]) {
        let paths: Vec<PathBuf> = stored.iter().map(|f| f.stored_path.clone()).collect();
        if self.entries.insert(submission_id, paths).is_some() {
            // Submission ids are unique; an overwrite means an entry was
            // never consumed by a dispatch event
            tracing::warn!(%submission_id, "Replacing an undispatched submission registry entry");
        }
    }

    /// Remove and return the stored paths for a submission.
    #[must_use]
    pub fn take(&self, submission_id: Uuid) -> Option<Vec<PathBuf>> {
        self.entries.remove(&submission_id).map(|(_, paths)| paths)
    }

    /// Number of submissions awaiting cleanup.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no submissions await cleanup.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deletes stored files in response to dispatch events.
#[derive(Debug, Clone)]
pub struct LifecycleCleaner {
    registry: SubmissionRegistry,
}

impl LifecycleCleaner {
    /// Create a cleaner over a registry.
    #[must_use]
    pub const fn new(registry: SubmissionRegistry) -> Self {
        Self { registry }
    }

    /// Subscribe to the bus and clean on every dispatch event until the bus
    /// closes. The spawned task is fire-and-forget; nothing awaits it.
    pub fn spawn(self, bus: &DispatchBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        self.clean_submission(event.submission_id);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Cleanup fell behind dispatch events; skipped submissions keep their files");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Delete every stored file registered for a submission.
    ///
    /// Idempotent: a second call for the same submission finds no registry
    /// entry and does nothing; a missing file counts as already cleaned.
    /// Returns the number of files actually deleted.
    pub fn clean_submission(&self, submission_id: Uuid) -> usize {
        let Some(paths) = self.registry.take(submission_id) else {
            tracing::debug!(%submission_id, "No stored files registered; nothing to clean");
            return 0;
        };

        let mut deleted = 0;
        for path in paths {
            match std::fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "Stored file already cleaned");
                }
                Err(e) => {
                    // The message is already sent; a leftover file is a
                    // logged condition, not a failure
                    tracing::error!(path = %path.display(), error = %e, "Failed to delete stored file");
                }
            }
        }

        tracing::info!(%submission_id, deleted, "Cleaned up dispatched submission");
        deleted
    }
}
