//! Core data types and error definitions for the processing pipeline.

use crate::auth::AuthError;
use crate::processing::store::{StoreError, StoredChunk};
use crate::providers::{ProviderError, ProviderErrorKind};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Free-form metadata attached to documents and chunks.
pub type Metadata = serde_json::Map<String, Value>;

/// Errors produced while turning raw text into chunks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkingError {
    /// Input was blank after whitespace normalization.
    #[error("Document content cannot be empty")]
    EmptyDocument,
    /// Chunker configured with an impossible size budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// One sentence-aligned slice of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Position within the document, starting at zero.
    pub index: usize,
    /// Chunk text, including any overlap carried from the previous chunk.
    pub content: String,
    /// Caller metadata plus `user_id`, `chunk_index`, `chunk_count` and `chunk_hash`.
    pub metadata: Metadata,
}

/// Document submitted for processing.
#[derive(Debug, Clone, Default)]
pub struct DocumentInput {
    /// Human-readable title.
    pub title: String,
    /// Raw text.
    pub content: String,
    /// Caller metadata copied onto the document and every chunk.
    pub metadata: Metadata,
    /// Private documents are only matched for their owner.
    pub is_private: bool,
}

impl DocumentInput {
    /// Public document without metadata.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Mark the document private.
    pub fn private(mut self) -> Self {
        self.is_private = true;
        self
    }
}

/// A committed document and its chunks.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    /// Identifier assigned by the store.
    pub id: String,
    /// Document title.
    pub title: String,
    /// Document metadata as stored.
    pub metadata: Metadata,
    /// Persisted chunks, in chunker order.
    pub chunks: Vec<StoredChunk>,
}

/// Batch lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Nothing started yet.
    #[default]
    Pending,
    /// Windows are being processed.
    Processing,
    /// Every window ran.
    Completed,
    /// The run stopped early.
    Error,
}

/// Snapshot of batch orchestration state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingProgress {
    /// Documents submitted.
    pub total_documents: usize,
    /// Documents committed so far.
    pub processed_documents: usize,
    /// Chunks expected across all chunkable documents.
    pub total_chunks: usize,
    /// Chunks committed so far.
    pub processed_chunks: usize,
    /// Current status.
    pub status: ProcessingStatus,
    /// Reason the run failed, when `status` is `Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Errors emitted by the document processing pipeline.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Caller failed the access check.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// Document content was blank.
    #[error("Document content cannot be empty")]
    EmptyContent,
    /// Chunking step failed to segment the document.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding call failed after retries.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Store rejected an operation.
    #[error("Document store request failed: {0}")]
    Store(#[from] StoreError),
    /// Processing failed and the rollback failed too; the store may hold partial state.
    #[error("Rollback failed for document {document_id}: {rollback} (while handling: {source})")]
    RollbackFailed {
        /// Document whose chunks may be left behind.
        document_id: String,
        /// Error that triggered the rollback.
        source: Box<ProcessingError>,
        /// Error returned by the rollback itself.
        rollback: StoreError,
    },
    /// Abort signal observed at a window boundary.
    #[error("Processing aborted by user")]
    Aborted,
}

impl ProcessingError {
    /// Whether the failure came from a provider rate limit.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Provider(error) => error.kind == ProviderErrorKind::RateLimit,
            _ => false,
        }
    }
}
