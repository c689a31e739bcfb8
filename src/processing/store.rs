//! Persistence boundary for processed documents.
//!
//! The pipeline only ever talks to storage through [`DocumentStore`]. Chunks written between
//! `begin_document_processing` and `commit_document_processing` must not be visible to
//! `match_documents`; `rollback_document_processing` discards them.

use crate::processing::types::Metadata;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a document store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No staged or committed document has this id.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),
    /// Operation is not allowed in the document's current state.
    #[error("Document {document_id} is {state}")]
    InvalidState {
        /// Document identifier.
        document_id: String,
        /// Current state name.
        state: &'static str,
    },
    /// Backend failure.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Document header written when processing begins.
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// Title.
    pub title: String,
    /// Normalized full text.
    pub content: String,
    /// Caller metadata.
    pub metadata: Metadata,
    /// Owner.
    pub user_id: String,
    /// Owning team, if any.
    pub team_id: Option<String>,
    /// Private documents only match for their owner.
    pub is_private: bool,
    /// Owner's department.
    pub department: Option<String>,
}

/// Store's view of a document header.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Identifier assigned by the store.
    pub id: String,
    /// Metadata as stored.
    pub metadata: Metadata,
}

/// Chunk write request.
#[derive(Debug, Clone)]
pub struct NewChunk {
    /// Parent document.
    pub document_id: String,
    /// Chunk text.
    pub content: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// Chunk metadata.
    pub metadata: Metadata,
    /// Owner.
    pub user_id: String,
    /// Owning team, if any.
    pub team_id: Option<String>,
    /// Owner's department.
    pub department: Option<String>,
}

/// Store's view of a written chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    /// Identifier assigned by the store.
    pub id: String,
    /// Parent document.
    pub document_id: String,
    /// Chunk text.
    pub content: String,
    /// Chunk metadata.
    pub metadata: Metadata,
}

/// Similarity query.
#[derive(Debug, Clone)]
pub struct MatchQuery {
    /// Query embedding.
    pub embedding: Vec<f32>,
    /// Minimum cosine similarity.
    pub threshold: f32,
    /// Maximum number of matches.
    pub limit: usize,
    /// Caller.
    pub user_id: String,
    /// Caller's department.
    pub department: Option<String>,
}

/// One similarity hit.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMatch {
    /// Parent document.
    pub document_id: String,
    /// Matching chunk.
    pub chunk_id: String,
    /// Chunk text.
    pub content: String,
    /// Cosine similarity to the query.
    pub similarity: f32,
    /// Chunk metadata.
    pub metadata: Metadata,
}

/// Transactional document persistence.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Stage a document header and return its id.
    async fn begin_document_processing(
        &self,
        document: NewDocument,
    ) -> Result<StoredDocument, StoreError>;

    /// Stage one chunk of a document in progress.
    async fn add_document_chunk(&self, chunk: NewChunk) -> Result<StoredChunk, StoreError>;

    /// Make the document and all its staged chunks visible.
    async fn commit_document_processing(&self, document_id: &str) -> Result<(), StoreError>;

    /// Discard the document and its staged chunks.
    async fn rollback_document_processing(&self, document_id: &str) -> Result<(), StoreError>;

    /// Committed chunks most similar to the query, best first.
    async fn match_documents(&self, query: &MatchQuery) -> Result<Vec<DocumentMatch>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Staged,
    Committed,
}

impl RecordState {
    fn name(self) -> &'static str {
        match self {
            Self::Staged => "staged",
            Self::Committed => "committed",
        }
    }
}

#[derive(Debug)]
struct DocumentRecord {
    header: NewDocument,
    state: RecordState,
    chunks: Vec<ChunkRecord>,
}

#[derive(Debug)]
struct ChunkRecord {
    stored: StoredChunk,
    embedding: Vec<f32>,
}

/// Process-local store used by the CLI and tests.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: Mutex<HashMap<String, DocumentRecord>>,
}

impl InMemoryDocumentStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DocumentRecord>> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of committed documents.
    pub fn committed_documents(&self) -> usize {
        self.lock()
            .values()
            .filter(|record| record.state == RecordState::Committed)
            .count()
    }

    /// Number of staged (uncommitted) documents.
    pub fn staged_documents(&self) -> usize {
        self.lock()
            .values()
            .filter(|record| record.state == RecordState::Staged)
            .count()
    }

    /// Committed chunks of a document in write order; empty when not committed.
    pub fn committed_chunks(&self, document_id: &str) -> Vec<StoredChunk> {
        self.lock()
            .get(document_id)
            .filter(|record| record.state == RecordState::Committed)
            .map(|record| record.chunks.iter().map(|chunk| chunk.stored.clone()).collect())
            .unwrap_or_default()
    }
}

fn visible_to(header: &NewDocument, query: &MatchQuery) -> bool {
    if header.user_id == query.user_id {
        return true;
    }
    if header.is_private {
        return false;
    }
    match (&header.department, &query.department) {
        (None, _) => true,
        (Some(owner), Some(caller)) => owner == caller,
        (Some(_), None) => false,
    }
}

/// Cosine similarity; zero when either vector has no magnitude or the lengths differ.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|v| v * v).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|v| v * v).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn begin_document_processing(
        &self,
        document: NewDocument,
    ) -> Result<StoredDocument, StoreError> {
        let id = Uuid::new_v4().to_string();
        let stored = StoredDocument {
            id: id.clone(),
            metadata: document.metadata.clone(),
        };
        self.lock().insert(
            id,
            DocumentRecord {
                header: document,
                state: RecordState::Staged,
                chunks: Vec::new(),
            },
        );
        Ok(stored)
    }

    async fn add_document_chunk(&self, chunk: NewChunk) -> Result<StoredChunk, StoreError> {
        let mut documents = self.lock();
        let record = documents
            .get_mut(&chunk.document_id)
            .ok_or_else(|| StoreError::DocumentNotFound(chunk.document_id.clone()))?;
        if record.state != RecordState::Staged {
            return Err(StoreError::InvalidState {
                document_id: chunk.document_id,
                state: record.state.name(),
            });
        }
        let stored = StoredChunk {
            id: Uuid::new_v4().to_string(),
            document_id: chunk.document_id,
            content: chunk.content,
            metadata: chunk.metadata,
        };
        record.chunks.push(ChunkRecord {
            stored: stored.clone(),
            embedding: chunk.embedding,
        });
        Ok(stored)
    }

    async fn commit_document_processing(&self, document_id: &str) -> Result<(), StoreError> {
        let mut documents = self.lock();
        let record = documents
            .get_mut(document_id)
            .ok_or_else(|| StoreError::DocumentNotFound(document_id.to_string()))?;
        record.state = RecordState::Committed;
        Ok(())
    }

    async fn rollback_document_processing(&self, document_id: &str) -> Result<(), StoreError> {
        let mut documents = self.lock();
        match documents.get(document_id).map(|record| record.state) {
            Some(RecordState::Committed) => Err(StoreError::InvalidState {
                document_id: document_id.to_string(),
                state: RecordState::Committed.name(),
            }),
            Some(RecordState::Staged) => {
                documents.remove(document_id);
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn match_documents(&self, query: &MatchQuery) -> Result<Vec<DocumentMatch>, StoreError> {
        let documents = self.lock();
        let mut matches: Vec<DocumentMatch> = documents
            .iter()
            .filter(|(_, record)| record.state == RecordState::Committed)
            .filter(|(_, record)| visible_to(&record.header, query))
            .flat_map(|(id, record)| {
                record.chunks.iter().map(move |chunk| (id, chunk))
            })
            .filter_map(|(id, chunk)| {
                let similarity = cosine_similarity(&query.embedding, &chunk.embedding);
                (similarity >= query.threshold).then(|| DocumentMatch {
                    document_id: id.clone(),
                    chunk_id: chunk.stored.id.clone(),
                    content: chunk.stored.content.clone(),
                    similarity,
                    metadata: chunk.stored.metadata.clone(),
                })
            })
            .collect();
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(query.limit);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(user_id: &str, department: Option<&str>, is_private: bool) -> NewDocument {
        NewDocument {
            title: "doc".into(),
            content: "body".into(),
            metadata: Metadata::new(),
            user_id: user_id.into(),
            team_id: None,
            is_private,
            department: department.map(str::to_string),
        }
    }

    fn chunk(document_id: &str, content: &str, embedding: Vec<f32>) -> NewChunk {
        NewChunk {
            document_id: document_id.into(),
            content: content.into(),
            embedding,
            metadata: Metadata::new(),
            user_id: "owner".into(),
            team_id: None,
            department: None,
        }
    }

    fn query(user_id: &str, department: Option<&str>) -> MatchQuery {
        MatchQuery {
            embedding: vec![1.0, 0.0],
            threshold: 0.5,
            limit: 10,
            user_id: user_id.into(),
            department: department.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn staged_chunks_are_invisible_until_commit() {
        let store = InMemoryDocumentStore::new();
        let doc = store
            .begin_document_processing(header("owner", None, false))
            .await
            .expect("begin");
        store
            .add_document_chunk(chunk(&doc.id, "hello", vec![1.0, 0.0]))
            .await
            .expect("chunk");

        assert!(store.match_documents(&query("owner", None)).await.unwrap().is_empty());
        assert_eq!(store.staged_documents(), 1);

        store.commit_document_processing(&doc.id).await.expect("commit");
        let hits = store.match_documents(&query("owner", None)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "hello");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(store.committed_chunks(&doc.id).len(), 1);
    }

    #[tokio::test]
    async fn rollback_discards_and_is_idempotent() {
        let store = InMemoryDocumentStore::new();
        let doc = store
            .begin_document_processing(header("owner", None, false))
            .await
            .expect("begin");
        store
            .add_document_chunk(chunk(&doc.id, "hello", vec![1.0, 0.0]))
            .await
            .expect("chunk");

        store.rollback_document_processing(&doc.id).await.expect("rollback");
        store.rollback_document_processing(&doc.id).await.expect("second rollback");
        assert_eq!(store.staged_documents(), 0);
        assert!(matches!(
            store.commit_document_processing(&doc.id).await,
            Err(StoreError::DocumentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn committed_documents_reject_writes_and_rollback() {
        let store = InMemoryDocumentStore::new();
        let doc = store
            .begin_document_processing(header("owner", None, false))
            .await
            .expect("begin");
        store.commit_document_processing(&doc.id).await.expect("commit");

        let error = store
            .add_document_chunk(chunk(&doc.id, "late", vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::InvalidState { state: "committed", .. }));
        assert!(store.rollback_document_processing(&doc.id).await.is_err());
    }

    #[tokio::test]
    async fn visibility_respects_privacy_and_department() {
        let store = InMemoryDocumentStore::new();
        for (owner, department, private) in [
            ("alice", Some("sales"), false),
            ("alice", Some("sales"), true),
            ("bob", None, false),
        ] {
            let doc = store
                .begin_document_processing(header(owner, department, private))
                .await
                .expect("begin");
            store
                .add_document_chunk(chunk(&doc.id, owner, vec![1.0, 0.1]))
                .await
                .expect("chunk");
            store.commit_document_processing(&doc.id).await.expect("commit");
        }

        assert_eq!(store.match_documents(&query("alice", Some("sales"))).await.unwrap().len(), 3);
        assert_eq!(store.match_documents(&query("carol", Some("sales"))).await.unwrap().len(), 2);
        assert_eq!(store.match_documents(&query("carol", Some("ops"))).await.unwrap().len(), 1);
        assert_eq!(store.match_documents(&query("carol", None)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn matches_are_thresholded_sorted_and_limited() {
        let store = InMemoryDocumentStore::new();
        let doc = store
            .begin_document_processing(header("owner", None, false))
            .await
            .expect("begin");
        for (content, embedding) in [
            ("close", vec![0.9, 0.1]),
            ("exact", vec![1.0, 0.0]),
            ("far", vec![0.0, 1.0]),
        ] {
            store
                .add_document_chunk(chunk(&doc.id, content, embedding))
                .await
                .expect("chunk");
        }
        store.commit_document_processing(&doc.id).await.expect("commit");

        let hits = store.match_documents(&query("owner", None)).await.unwrap();
        let contents: Vec<&str> = hits.iter().map(|hit| hit.content.as_str()).collect();
        assert_eq!(contents, vec!["exact", "close"]);

        let mut limited = query("owner", None);
        limited.limit = 1;
        assert_eq!(store.match_documents(&limited).await.unwrap().len(), 1);
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
