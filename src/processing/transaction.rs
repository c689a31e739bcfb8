//! Begin/add/commit/rollback protocol over a [`DocumentStore`] as an explicit state machine.
//!
//! `Pending -> ChunksWritten -> Committed | RolledBack`. Rollback is idempotent and safe before
//! any chunk was written; commit and rollback are terminal.

use crate::processing::store::{DocumentStore, NewChunk, NewDocument, StoreError, StoredChunk, StoredDocument};
use std::sync::Arc;

/// Transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Document header staged, no chunks yet.
    Pending,
    /// At least one chunk staged.
    ChunksWritten,
    /// Document visible.
    Committed,
    /// Document discarded.
    RolledBack,
}

impl TransactionState {
    fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ChunksWritten => "chunks-written",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        }
    }

    fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::ChunksWritten)
    }
}

/// One document's chunk writes.
pub struct DocumentTransaction {
    store: Arc<dyn DocumentStore>,
    document: StoredDocument,
    chunks: Vec<StoredChunk>,
    state: TransactionState,
}

impl DocumentTransaction {
    /// Stage the document header.
    pub async fn begin(
        store: Arc<dyn DocumentStore>,
        document: NewDocument,
    ) -> Result<Self, StoreError> {
        let document = store.begin_document_processing(document).await?;
        tracing::debug!(document_id = %document.id, "Began document transaction");
        Ok(Self {
            store,
            document,
            chunks: Vec::new(),
            state: TransactionState::Pending,
        })
    }

    /// Store-assigned document id.
    pub fn document_id(&self) -> &str {
        &self.document.id
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.state.is_open() {
            Ok(())
        } else {
            Err(StoreError::InvalidState {
                document_id: self.document.id.clone(),
                state: self.state.name(),
            })
        }
    }

    /// Stage a chunk. `chunk.document_id` is overwritten with this transaction's document.
    pub async fn add_chunk(&mut self, mut chunk: NewChunk) -> Result<&StoredChunk, StoreError> {
        self.ensure_open()?;
        chunk.document_id = self.document.id.clone();
        let stored = self.store.add_document_chunk(chunk).await?;
        self.state = TransactionState::ChunksWritten;
        self.chunks.push(stored);
        Ok(&self.chunks[self.chunks.len() - 1])
    }

    /// Make the document visible.
    pub async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.store.commit_document_processing(&self.document.id).await?;
        self.state = TransactionState::Committed;
        tracing::debug!(document_id = %self.document.id, chunks = self.chunks.len(), "Committed document");
        Ok(())
    }

    /// Discard the document. A no-op once rolled back.
    pub async fn rollback(&mut self) -> Result<(), StoreError> {
        match self.state {
            TransactionState::RolledBack => return Ok(()),
            TransactionState::Committed => return self.ensure_open(),
            TransactionState::Pending | TransactionState::ChunksWritten => {}
        }
        self.store
            .rollback_document_processing(&self.document.id)
            .await?;
        self.state = TransactionState::RolledBack;
        tracing::warn!(document_id = %self.document.id, discarded = self.chunks.len(), "Rolled back document");
        self.chunks.clear();
        Ok(())
    }

    /// Document header and chunks written so far.
    pub fn into_parts(mut self) -> (StoredDocument, Vec<StoredChunk>) {
        let chunks = std::mem::take(&mut self.chunks);
        let document = self.document.clone();
        // Consumed by the caller; suppress the unfinished-transaction warning.
        self.state = TransactionState::Committed;
        (document, chunks)
    }
}

impl Drop for DocumentTransaction {
    fn drop(&mut self) {
        if self.state.is_open() {
            tracing::warn!(
                document_id = %self.document.id,
                state = self.state.name(),
                "Document transaction dropped without commit or rollback"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::store::InMemoryDocumentStore;
    use crate::processing::types::Metadata;

    fn header() -> NewDocument {
        NewDocument {
            title: "t".into(),
            content: "c".into(),
            metadata: Metadata::new(),
            user_id: "u".into(),
            team_id: None,
            is_private: false,
            department: None,
        }
    }

    fn chunk(content: &str) -> NewChunk {
        NewChunk {
            document_id: String::new(),
            content: content.into(),
            embedding: vec![1.0],
            metadata: Metadata::new(),
            user_id: "u".into(),
            team_id: None,
            department: None,
        }
    }

    #[tokio::test]
    async fn walks_pending_to_committed() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let mut tx = DocumentTransaction::begin(store.clone(), header()).await.expect("begin");
        assert_eq!(tx.state(), TransactionState::Pending);

        let stored = tx.add_chunk(chunk("a")).await.expect("chunk");
        assert_eq!(stored.content, "a");
        assert_eq!(tx.state(), TransactionState::ChunksWritten);

        tx.commit().await.expect("commit");
        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(tx.add_chunk(chunk("b")).await.is_err());
        assert!(tx.rollback().await.is_err());

        let (document, chunks) = tx.into_parts();
        assert_eq!(chunks.len(), 1);
        assert_eq!(store.committed_chunks(&document.id).len(), 1);
    }

    #[tokio::test]
    async fn rollback_without_chunks_is_safe_and_idempotent() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let mut tx = DocumentTransaction::begin(store.clone(), header()).await.expect("begin");
        tx.rollback().await.expect("rollback");
        tx.rollback().await.expect("second rollback");
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert!(tx.commit().await.is_err());
        assert_eq!(store.staged_documents(), 0);
    }
}
