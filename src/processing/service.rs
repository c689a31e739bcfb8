//! Document processor coordinating access checks, chunking, embedding and transactional writes.

use crate::{
    auth::{AuthError, UserContext, UserDirectory, authorize},
    metrics::{MetricsSnapshot, PipelineMetrics},
    processing::{
        chunking::Chunker,
        store::{DocumentMatch, DocumentStore, MatchQuery, NewChunk, NewDocument},
        transaction::DocumentTransaction,
        types::{Chunk, DocumentInput, ProcessedDocument, ProcessingError, ProcessingProgress},
    },
    providers::AiProvider,
};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Turns documents into committed, embedded chunks.
///
/// Each document runs `authorize -> chunk -> begin -> (embed -> add)* -> commit`; any failure
/// after `begin` rolls the document back before the error is returned, so a document is either
/// fully visible or absent. Construct once and share through an `Arc`.
pub struct DocumentProcessor {
    pub(super) provider: Arc<dyn AiProvider>,
    pub(super) store: Arc<dyn DocumentStore>,
    pub(super) users: Arc<dyn UserDirectory>,
    pub(super) chunker: Chunker,
    pub(super) metrics: Arc<PipelineMetrics>,
    pub(super) progress: Arc<Mutex<ProcessingProgress>>,
}

impl DocumentProcessor {
    /// Build a processor over the given collaborators.
    pub fn new(
        provider: Arc<dyn AiProvider>,
        store: Arc<dyn DocumentStore>,
        users: Arc<dyn UserDirectory>,
        chunker: Chunker,
    ) -> Self {
        Self {
            provider,
            store,
            users,
            chunker,
            metrics: Arc::new(PipelineMetrics::new()),
            progress: Arc::new(Mutex::new(ProcessingProgress::default())),
        }
    }

    /// Share an existing metrics registry.
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Current metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Snapshot published by the most recently updated batch run. Each run tracks its own
    /// counters, so concurrent batches never mix totals; this reports whichever ran last.
    pub fn get_progress(&self) -> ProcessingProgress {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(super) fn publish_progress(&self, snapshot: &ProcessingProgress) {
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
    }

    async fn authorize_caller(&self, user_id: &str) -> Result<UserContext, ProcessingError> {
        let user = authorize(self.users.as_ref()).await?;
        if user.user_id != user_id {
            tracing::warn!(caller = %user.user_id, requested = user_id, "Caller does not match requested user");
            return Err(AuthError::Unauthorized.into());
        }
        Ok(user)
    }

    /// Chunk, embed and commit one document.
    pub async fn process_document(
        &self,
        document: &DocumentInput,
        user_id: &str,
        team_id: Option<&str>,
    ) -> Result<ProcessedDocument, ProcessingError> {
        let user = self.authorize_caller(user_id).await?;
        if document.content.trim().is_empty() {
            self.metrics.record_failure();
            return Err(ProcessingError::EmptyContent);
        }

        let chunks = self
            .chunker
            .generate_chunks(&document.content, user_id, &document.metadata)?;
        tracing::info!(
            title = %document.title,
            chunks = chunks.len(),
            provider = self.provider.name(),
            "Processing document"
        );

        let header = NewDocument {
            title: document.title.clone(),
            content: document.content.clone(),
            metadata: document.metadata.clone(),
            user_id: user_id.to_string(),
            team_id: team_id.map(str::to_string),
            is_private: document.is_private,
            department: user.department.clone(),
        };
        let mut transaction = match DocumentTransaction::begin(Arc::clone(&self.store), header).await
        {
            Ok(transaction) => transaction,
            Err(error) => {
                self.metrics.record_failure();
                return Err(error.into());
            }
        };

        let written = match self
            .write_chunks(&mut transaction, &chunks, &user, team_id)
            .await
        {
            Ok(()) => transaction.commit().await.map_err(ProcessingError::from),
            Err(error) => Err(error),
        };

        if let Err(error) = written {
            self.metrics.record_failure();
            let document_id = transaction.document_id().to_string();
            return match transaction.rollback().await {
                Ok(()) => {
                    self.metrics.record_rollback();
                    tracing::warn!(%document_id, error = %error, "Document processing failed; rolled back");
                    Err(error)
                }
                Err(rollback) => {
                    tracing::error!(
                        %document_id,
                        error = %error,
                        rollback_error = %rollback,
                        "Rollback failed; document may be partially stored"
                    );
                    Err(ProcessingError::RollbackFailed {
                        document_id,
                        source: Box::new(error),
                        rollback,
                    })
                }
            };
        }

        let (stored, chunks) = transaction.into_parts();
        self.metrics.record_document(chunks.len() as u64);
        tracing::info!(document_id = %stored.id, chunks = chunks.len(), "Document committed");
        Ok(ProcessedDocument {
            id: stored.id,
            title: document.title.clone(),
            metadata: stored.metadata,
            chunks,
        })
    }

    async fn write_chunks(
        &self,
        transaction: &mut DocumentTransaction,
        chunks: &[Chunk],
        user: &UserContext,
        team_id: Option<&str>,
    ) -> Result<(), ProcessingError> {
        for chunk in chunks {
            let embedding = self.provider.generate_embedding(&chunk.content).await?;
            let mut metadata = chunk.metadata.clone();
            metadata.insert("processed_at".into(), Value::String(current_timestamp_rfc3339()));
            transaction
                .add_chunk(NewChunk {
                    document_id: transaction.document_id().to_string(),
                    content: chunk.content.clone(),
                    embedding: embedding.embedding,
                    metadata,
                    user_id: user.user_id.clone(),
                    team_id: team_id.map(str::to_string),
                    department: user.department.clone(),
                })
                .await?;
            tracing::debug!(
                document_id = transaction.document_id(),
                chunk_index = chunk.index,
                "Persisted chunk"
            );
        }
        Ok(())
    }

    /// Embed `query` and return the caller-visible chunks most similar to it.
    pub async fn search(
        &self,
        query: &str,
        user_id: &str,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<DocumentMatch>, ProcessingError> {
        let user = self.authorize_caller(user_id).await?;
        let embedding = self.provider.generate_embedding(query).await?;
        let matches = self
            .store
            .match_documents(&MatchQuery {
                embedding: embedding.embedding,
                threshold,
                limit,
                user_id: user.user_id,
                department: user.department,
            })
            .await?;
        tracing::debug!(hits = matches.len(), threshold, limit, "Search completed");
        Ok(matches)
    }
}

/// Current timestamp formatted for chunk metadata.
fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticUserDirectory;
    use crate::processing::chunking::ChunkerConfig;
    use crate::processing::store::StoreError;
    use crate::processing::testing::{CountingStore, ScriptedProvider};

    const THREE_CHUNKS: &str = "Alpha sentence is the first one. Beta sentence is the second one. \
                                Gamma sentence is the third one.";

    fn small_chunker() -> Chunker {
        Chunker::new(ChunkerConfig {
            chunk_size: 40,
            chunk_overlap: 0,
            min_chunk_length: 10,
        })
        .expect("chunker")
    }

    fn processor(provider: ScriptedProvider, store: Arc<CountingStore>) -> DocumentProcessor {
        DocumentProcessor::new(
            Arc::new(provider),
            store,
            Arc::new(StaticUserDirectory::new(
                UserContext::active("user-1").with_department("research"),
            )),
            small_chunker(),
        )
    }

    #[tokio::test]
    async fn commits_every_chunk_with_metadata() {
        let store = Arc::new(CountingStore::new());
        let processor = processor(ScriptedProvider::new(), store.clone());
        let input = DocumentInput::new("Greek", THREE_CHUNKS).with_metadata("source", "notes");

        let processed = processor
            .process_document(&input, "user-1", Some("team-9"))
            .await
            .expect("processed");

        assert_eq!(processed.chunks.len(), 3);
        assert_eq!(store.counts(), (1, 3, 1, 0));
        let first = &processed.chunks[0].metadata;
        assert_eq!(first["source"], "notes");
        assert_eq!(first["chunk_count"], 3);
        assert!(first["processed_at"].as_str().is_some_and(|ts| ts.contains('T')));
        assert_eq!(store.inner().committed_chunks(&processed.id).len(), 3);

        let snapshot = processor.metrics_snapshot();
        assert_eq!(snapshot.documents_processed, 1);
        assert_eq!(snapshot.chunks_persisted, 3);
    }

    #[tokio::test]
    async fn embedding_failure_rolls_back_once() {
        let store = Arc::new(CountingStore::new());
        let provider = ScriptedProvider::new().fail_on_call(2);
        let processor = processor(provider, store.clone());

        let error = processor
            .process_document(&DocumentInput::new("Greek", THREE_CHUNKS), "user-1", None)
            .await
            .unwrap_err();

        assert!(matches!(error, ProcessingError::Provider(_)));
        assert_eq!(store.counts(), (1, 1, 0, 1));
        assert_eq!(store.inner().committed_documents(), 0);
        assert_eq!(store.inner().staged_documents(), 0);
        assert_eq!(processor.metrics_snapshot().rollbacks, 1);
    }

    #[tokio::test]
    async fn rollback_failure_is_reported_distinctly() {
        let store = Arc::new(CountingStore::new().fail_rollback());
        let provider = ScriptedProvider::new().fail_on_call(1);
        let processor = processor(provider, store.clone());

        let error = processor
            .process_document(&DocumentInput::new("Greek", THREE_CHUNKS), "user-1", None)
            .await
            .unwrap_err();

        match error {
            ProcessingError::RollbackFailed {
                source, rollback, ..
            } => {
                assert!(matches!(*source, ProcessingError::Provider(_)));
                assert_eq!(rollback, StoreError::Backend("rollback unavailable".into()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.counts(), (1, 0, 0, 1));
    }

    #[tokio::test]
    async fn empty_content_touches_nothing() {
        let store = Arc::new(CountingStore::new());
        let provider = ScriptedProvider::new();
        let calls = provider.call_counter();
        let processor = processor(provider, store.clone());

        let error = processor
            .process_document(&DocumentInput::new("Blank", "  \n "), "user-1", None)
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "Document content cannot be empty");
        assert_eq!(store.counts(), (0, 0, 0, 0));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn access_checks_run_first() {
        let store = Arc::new(CountingStore::new());
        let anonymous = DocumentProcessor::new(
            Arc::new(ScriptedProvider::new()),
            store.clone(),
            Arc::new(StaticUserDirectory::anonymous()),
            small_chunker(),
        );
        let error = anonymous
            .process_document(&DocumentInput::new("t", THREE_CHUNKS), "user-1", None)
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "Unauthorized");

        let mut inactive = UserContext::active("user-1");
        inactive.is_active = false;
        let inactive = DocumentProcessor::new(
            Arc::new(ScriptedProvider::new()),
            store.clone(),
            Arc::new(StaticUserDirectory::new(inactive)),
            small_chunker(),
        );
        let error = inactive
            .process_document(&DocumentInput::new("t", THREE_CHUNKS), "user-1", None)
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "User not found or inactive");

        let processor = processor(ScriptedProvider::new(), store.clone());
        let error = processor
            .process_document(&DocumentInput::new("t", THREE_CHUNKS), "someone-else", None)
            .await
            .unwrap_err();
        assert!(matches!(error, ProcessingError::Auth(AuthError::Unauthorized)));
        assert_eq!(store.counts(), (0, 0, 0, 0));
    }

    #[tokio::test]
    async fn search_finds_committed_chunks() {
        let store = Arc::new(CountingStore::new());
        let processor = processor(ScriptedProvider::new(), store);
        processor
            .process_document(&DocumentInput::new("Greek", THREE_CHUNKS), "user-1", None)
            .await
            .expect("processed");

        let hits = processor
            .search("Beta sentence is the second one.", "user-1", 0.99, 5)
            .await
            .expect("hits");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "Beta sentence is the second one.");
    }
}
