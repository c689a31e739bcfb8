//! Windowed batch processing with progress reporting and cooperative cancellation.

use crate::processing::{
    service::DocumentProcessor,
    types::{
        DocumentInput, ProcessedDocument, ProcessingError, ProcessingProgress, ProcessingStatus,
    },
};
use futures_util::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Called with a progress snapshot after each committed document and when the batch ends.
pub type ProgressCallback = Arc<dyn Fn(&ProcessingProgress) + Send + Sync>;

/// Cloneable cancellation flag, checked only between windows.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    /// Fresh, unaborted signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Batch tuning.
#[derive(Clone)]
pub struct BatchOptions {
    /// Documents per window.
    pub concurrency: usize,
    /// Progress observer.
    pub on_progress: Option<ProgressCallback>,
    /// Cancellation flag.
    pub abort_signal: Option<AbortSignal>,
    /// Pause before every window after the first.
    pub batch_delay: Duration,
    /// Extra attempts for a document that failed on a provider rate limit.
    pub rate_limit_retries: u32,
    /// Pause before each of those attempts.
    pub rate_limit_retry_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            on_progress: None,
            abort_signal: None,
            batch_delay: Duration::from_secs(1),
            rate_limit_retries: 3,
            rate_limit_retry_delay: Duration::from_secs(2),
        }
    }
}

impl BatchOptions {
    fn notify(&self, progress: &ProcessingProgress) {
        if let Some(callback) = &self.on_progress {
            callback(progress);
        }
    }

    fn aborted(&self) -> bool {
        self.abort_signal
            .as_ref()
            .is_some_and(AbortSignal::is_aborted)
    }
}

/// Progress owned by one `process_batch` call, published to the processor on every change.
struct RunProgress<'a> {
    processor: &'a DocumentProcessor,
    progress: Mutex<ProcessingProgress>,
}

impl<'a> RunProgress<'a> {
    fn start(processor: &'a DocumentProcessor, initial: ProcessingProgress) -> Self {
        processor.publish_progress(&initial);
        Self {
            processor,
            progress: Mutex::new(initial),
        }
    }

    fn update(&self, update: impl FnOnce(&mut ProcessingProgress)) -> ProcessingProgress {
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut progress);
        let snapshot = progress.clone();
        drop(progress);
        self.processor.publish_progress(&snapshot);
        snapshot
    }
}

/// Per-document outcomes in submission order, plus the final progress snapshot.
#[derive(Debug)]
pub struct BatchOutcome {
    /// One entry per submitted document.
    pub results: Vec<Result<ProcessedDocument, ProcessingError>>,
    /// Progress at completion.
    pub progress: ProcessingProgress,
}

impl BatchOutcome {
    /// Number of committed documents.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|result| result.is_ok()).count()
    }
}

impl DocumentProcessor {
    /// Process `documents` in sequential windows of `options.concurrency`.
    ///
    /// Documents inside a window run concurrently and fail independently. The abort signal is
    /// checked at the start of every window; once set, the batch stops with
    /// [`ProcessingError::Aborted`] and documents already committed stay committed.
    pub async fn process_batch(
        &self,
        documents: &[DocumentInput],
        user_id: &str,
        team_id: Option<&str>,
        options: BatchOptions,
    ) -> Result<BatchOutcome, ProcessingError> {
        let concurrency = options.concurrency.max(1);
        let total_chunks = documents
            .iter()
            .filter_map(|document| self.chunker.split_into_chunks(&document.content).ok())
            .map(|chunks| chunks.len())
            .sum();
        let run = RunProgress::start(
            self,
            ProcessingProgress {
                total_documents: documents.len(),
                total_chunks,
                status: ProcessingStatus::Processing,
                ..ProcessingProgress::default()
            },
        );
        tracing::info!(
            documents = documents.len(),
            concurrency,
            total_chunks,
            "Starting batch"
        );

        let mut results = Vec::with_capacity(documents.len());
        for (window_index, window) in documents.chunks(concurrency).enumerate() {
            if window_index > 0 && !options.batch_delay.is_zero() {
                tokio::time::sleep(options.batch_delay).await;
            }
            if options.aborted() {
                let snapshot = run.update(|progress| {
                    progress.status = ProcessingStatus::Error;
                    progress.error = Some(ProcessingError::Aborted.to_string());
                });
                options.notify(&snapshot);
                tracing::warn!(
                    window = window_index,
                    processed = snapshot.processed_documents,
                    "Batch aborted"
                );
                return Err(ProcessingError::Aborted);
            }

            tracing::debug!(window = window_index, size = window.len(), "Processing window");
            let outcomes = join_all(
                window
                    .iter()
                    .map(|document| {
                        self.process_with_retry(document, user_id, team_id, &options, &run)
                    }),
            )
            .await;
            results.extend(outcomes);
        }

        let progress = run.update(|progress| {
            progress.status = ProcessingStatus::Completed;
        });
        options.notify(&progress);
        tracing::info!(
            processed = progress.processed_documents,
            failed = results.len() - progress.processed_documents,
            chunks = progress.processed_chunks,
            "Batch completed"
        );
        Ok(BatchOutcome { results, progress })
    }

    async fn process_with_retry(
        &self,
        document: &DocumentInput,
        user_id: &str,
        team_id: Option<&str>,
        options: &BatchOptions,
        run: &RunProgress<'_>,
    ) -> Result<ProcessedDocument, ProcessingError> {
        let mut attempt = 0;
        loop {
            match self.process_document(document, user_id, team_id).await {
                Ok(processed) => {
                    let snapshot = run.update(|progress| {
                        progress.processed_documents += 1;
                        progress.processed_chunks += processed.chunks.len();
                    });
                    options.notify(&snapshot);
                    return Ok(processed);
                }
                Err(error) if error.is_rate_limited() && attempt < options.rate_limit_retries => {
                    attempt += 1;
                    tracing::warn!(
                        title = %document.title,
                        attempt,
                        delay_ms = options.rate_limit_retry_delay.as_millis() as u64,
                        "Document rate limited; retrying"
                    );
                    tokio::time::sleep(options.rate_limit_retry_delay).await;
                }
                Err(error) => {
                    tracing::warn!(title = %document.title, error = %error, "Document failed");
                    return Err(error);
                }
            }
        }
    }
}
