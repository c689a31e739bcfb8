//! Document processing pipeline: chunking, embedding, transactional persistence and batches.

pub mod batch;
pub mod chunking;
mod service;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;
pub mod transaction;
pub mod types;

pub use batch::{AbortSignal, BatchOptions, BatchOutcome, ProgressCallback};
pub use chunking::{Chunker, ChunkerConfig};
pub use service::DocumentProcessor;
pub use store::{
    DocumentMatch, DocumentStore, InMemoryDocumentStore, MatchQuery, NewChunk, NewDocument,
    StoreError, StoredChunk, StoredDocument,
};
pub use transaction::{DocumentTransaction, TransactionState};
pub use types::{
    Chunk, ChunkingError, DocumentInput, Metadata, ProcessedDocument, ProcessingError,
    ProcessingProgress, ProcessingStatus,
};
