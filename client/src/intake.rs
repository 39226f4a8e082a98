//! Selected-file intake.
//!
//! Owns the client-side list of files picked via drag-drop or the file
//! picker: applies advisory checks, schedules asynchronous preprocessing,
//! and keeps the preview/progress state the embedding UI renders. Rejected
//! files surface as feedback text, never as errors: the user retries in
//! place and the server remains the authority.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::Notify;
use uuid::Uuid;

use fp_common::{FieldConfig, TypeMatcher};

use crate::preprocess::{self, PreprocessError, ProcessedBlob, ResizeTarget};

/// A file the user has selected, tracked through preprocessing.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    /// Stable identifier for this selection.
    pub id: Uuid,
    /// Filename as picked.
    pub file_name: String,
    /// Claimed or guessed MIME type.
    pub mime_type: String,
    /// Raw payload as picked.
    pub raw_data: Bytes,
    /// Raw payload size in bytes.
    pub size_bytes: u64,
    /// Preview data URL, set once preprocessing settles.
    pub preview_url: Option<String>,
    /// Preprocessed payload, set once preprocessing settles.
    pub processed_data: Option<Bytes>,
    /// Strictly increasing selection order; preview order follows this,
    /// never completion order.
    pub selection_index: u64,
    /// Token captured by the preprocessing task at scheduling time; a
    /// mismatched token on completion means the result is stale.
    pub generation: u64,
}

/// One picked file handed to [`FileIntake::add_files`].
#[derive(Debug, Clone)]
pub struct PickedFile {
    /// Filename reported by the picker or drop event.
    pub name: String,
    /// MIME type reported by the picker, if any.
    pub mime_type: Option<String>,
    /// File contents.
    pub data: Bytes,
}

/// Advisory progress for the current add batch, coarsened to "file N of M".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Files whose preprocessing has settled.
    pub completed: usize,
    /// Files accepted into the current batch.
    pub total: usize,
}

/// One file's worth of work handed to the preprocessing stage.
#[derive(Debug, Clone)]
pub struct PreprocessJob {
    /// Filename, for diagnostics.
    pub file_name: String,
    /// File contents.
    pub data: Bytes,
    /// Claimed MIME type.
    pub mime_type: String,
    /// Pixel and byte budgets from the field configuration.
    pub target: ResizeTarget,
}

/// Pipeline stage interface for per-file preprocessing.
///
/// The intake invokes this once per accepted file; completions may arrive in
/// any order. The default implementation is [`ImagePreprocessor`].
pub trait PreprocessStage: Send + Sync + 'static {
    /// Process one file.
    fn process(&self, job: PreprocessJob) -> BoxFuture<'static, Result<ProcessedBlob, PreprocessError>>;
}

/// Default preprocessing stage: image downscaling on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagePreprocessor;

impl PreprocessStage for ImagePreprocessor {
    fn process(&self, job: PreprocessJob) -> BoxFuture<'static, Result<ProcessedBlob, PreprocessError>> {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                preprocess::process_blob(&job.data, &job.mime_type, job.target)
            })
            .await
            .map_err(|e| PreprocessError::TaskFailed(e.to_string()))?
        })
    }
}

#[derive(Default)]
struct IntakeState {
    /// Selected files keyed by selection index, so iteration follows
    /// selection order regardless of completion order.
    files: BTreeMap<u64, SelectedFile>,
    next_selection_index: u64,
    /// Bumped every time a preprocessing task is scheduled; stale results
    /// are recognized by comparing against the entry's captured value.
    generation: u64,
    /// Preprocessing tasks still in flight.
    pending: usize,
    feedback: Option<String>,
    progress: Progress,
}

struct Inner {
    state: Mutex<IntakeState>,
    settled: Notify,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, IntakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit one preprocessing completion. Results whose entry is gone or
    /// whose generation no longer matches are silently discarded.
    fn commit(
        &self,
        selection_index: u64,
        generation: u64,
        result: Result<ProcessedBlob, PreprocessError>,
    ) {
        let mut state = self.state();

        let current = state
            .files
            .get(&selection_index)
            .map(|file| file.generation);
        if current == Some(generation) {
            match result {
                Ok(blob) => {
                    let preview = format!("data:{};base64,{}", blob.mime_type, BASE64.encode(&blob.data));
                    if let Some(file) = state.files.get_mut(&selection_index) {
                        file.processed_data = Some(Bytes::from(blob.data));
                        file.preview_url = Some(preview);
                    }
                }
                Err(e) => {
                    // Per-file failure: drop this entry, leave siblings alone
                    if let Some(file) = state.files.remove(&selection_index) {
                        tracing::warn!(
                            file_name = %file.file_name,
                            error = %e,
                            "Preprocessing failed, file removed from selection"
                        );
                        state.feedback = Some(format!("Error processing {}", file.file_name));
                    }
                }
            }
            state.progress.completed += 1;
        } else {
            tracing::debug!(
                selection_index,
                generation,
                "Discarding stale preprocessing result"
            );
        }

        state.pending = state.pending.saturating_sub(1);
        drop(state);
        self.settled.notify_waiters();
    }
}

/// Client-side intake for one multi-file field.
///
/// UI-visible state (previews, feedback, progress) mutates only under the
/// internal lock and is keyed by selection index, so the rendered order
/// always matches selection order.
pub struct FileIntake {
    config: FieldConfig,
    matcher: TypeMatcher,
    stage: Arc<dyn PreprocessStage>,
    inner: Arc<Inner>,
}

impl FileIntake {
    /// Create an intake with the default image preprocessing stage.
    pub fn new(config: FieldConfig) -> Result<Self, regex::Error> {
        Self::with_stage(config, ImagePreprocessor)
    }

    /// Create an intake with a custom preprocessing stage.
    pub fn with_stage(
        config: FieldConfig,
        stage: impl PreprocessStage,
    ) -> Result<Self, regex::Error> {
        let matcher = TypeMatcher::new(&config.accepted_types)?;
        Ok(Self {
            config,
            matcher,
            stage: Arc::new(stage),
            inner: Arc::new(Inner {
                state: Mutex::new(IntakeState::default()),
                settled: Notify::new(),
            }),
        })
    }

    /// Field configuration this intake enforces.
    #[must_use]
    pub const fn config(&self) -> &FieldConfig {
        &self.config
    }

    /// Accept files from a drop or picker event.
    ///
    /// Advisory checks run per file (accepted type) and across the list
    /// (count and total size); offending files are rejected with a feedback
    /// message and the rest proceed. Each accepted file is scheduled for
    /// asynchronous preprocessing. Must be called inside a tokio runtime.
    pub fn add_files(&self, files: Vec<PickedFile>) {
        let target = ResizeTarget {
            max_width: self.config.preview_width,
            max_height: self.config.preview_height,
            max_bytes: self.config.per_file_size_limit,
        };

        let mut jobs = Vec::new();
        {
            let mut state = self.inner.state();
            state.progress = Progress::default();

            let max_count = self.config.max_count.map_or(usize::MAX, |max| max as usize);
            let mut total_bytes: u64 = state.files.values().map(|f| f.size_bytes).sum();

            for picked in files {
                let mime_type = picked.mime_type.clone().unwrap_or_else(|| {
                    mime_guess::from_path(&picked.name)
                        .first()
                        .map_or_else(|| "application/octet-stream".to_string(), |m| m.to_string())
                });

                if !self.matcher.matches(&picked.name, &mime_type) {
                    tracing::debug!(file_name = %picked.name, mime_type = %mime_type, "Rejected: type not accepted");
                    state.feedback = Some(format!("File type not accepted: {}", picked.name));
                    continue;
                }

                if state.files.len() >= max_count {
                    state.feedback = Some(format!(
                        "You cannot upload more than {max_count} files"
                    ));
                    continue;
                }

                let size_bytes = picked.data.len() as u64;
                if total_bytes + size_bytes > self.config.total_size_limit {
                    state.feedback = Some(format!(
                        "Total upload size exceeds {} bytes",
                        self.config.total_size_limit
                    ));
                    continue;
                }
                total_bytes += size_bytes;

                let selection_index = state.next_selection_index;
                state.next_selection_index += 1;
                state.generation += 1;
                let generation = state.generation;

                state.files.insert(
                    selection_index,
                    SelectedFile {
                        id: Uuid::new_v4(),
                        file_name: picked.name.clone(),
                        mime_type: mime_type.clone(),
                        raw_data: picked.data.clone(),
                        size_bytes,
                        preview_url: None,
                        processed_data: None,
                        selection_index,
                        generation,
                    },
                );
                state.pending += 1;

                jobs.push((
                    selection_index,
                    generation,
                    PreprocessJob {
                        file_name: picked.name,
                        data: picked.data,
                        mime_type,
                        target,
                    },
                ));
            }

            state.progress.total = jobs.len();
        }

        for (selection_index, generation, job) in jobs {
            let inner = Arc::clone(&self.inner);
            let stage = Arc::clone(&self.stage);
            tokio::spawn(async move {
                let result = stage.process(job).await;
                inner.commit(selection_index, generation, result);
            });
        }
    }

    /// Delete one file by its selection index.
    ///
    /// Survivors keep their indices and order. An in-flight preprocessing
    /// task for the deleted file will find its entry gone and discard its
    /// result. Returns whether an entry was removed.
    pub fn delete_file(&self, selection_index: u64) -> bool {
        let mut state = self.inner.state();
        state.generation += 1;
        state.files.remove(&selection_index).is_some()
    }

    /// Clear all selection state, as on a form reset after successful
    /// submission. In-flight preprocessing results are discarded.
    pub fn reset(&self) {
        let mut state = self.inner.state();
        state.generation += 1;
        state.files.clear();
        state.feedback = None;
        state.progress = Progress::default();
    }

    /// Wait until every scheduled preprocessing task has settled.
    pub async fn settled(&self) {
        loop {
            // Register interest before checking, so a completion landing
            // between the check and the await still wakes us
            let mut notified = std::pin::pin!(self.inner.settled.notified());
            notified.as_mut().enable();
            if self.inner.state().pending == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Snapshot of the selected files in selection order.
    #[must_use]
    pub fn selected(&self) -> Vec<SelectedFile> {
        self.inner.state().files.values().cloned().collect()
    }

    /// Current locally-displayed feedback message, if any.
    #[must_use]
    pub fn feedback(&self) -> Option<String> {
        self.inner.state().feedback.clone()
    }

    /// Progress for the current add batch.
    #[must_use]
    pub fn progress(&self) -> Progress {
        self.inner.state().progress
    }
}
