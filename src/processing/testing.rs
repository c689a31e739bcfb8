//! Fakes shared by the processing tests.

use crate::processing::store::{
    DocumentMatch, DocumentStore, InMemoryDocumentStore, MatchQuery, NewChunk, NewDocument,
    StoreError, StoredChunk, StoredDocument,
};
use crate::providers::{
    AiProvider, ChatMessage, ChatResponse, ChatStream, EmbeddingResponse, OfflineProvider,
    ProviderError,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Offline provider whose embedding calls can be scripted to fail.
pub(crate) struct ScriptedProvider {
    inner: OfflineProvider,
    calls: Arc<AtomicUsize>,
    fail_on_call: Option<usize>,
    rate_limited_calls: usize,
    fail_when_contains: Option<String>,
}

impl ScriptedProvider {
    pub(crate) fn new() -> Self {
        Self {
            inner: OfflineProvider::default(),
            calls: Arc::new(AtomicUsize::new(0)),
            fail_on_call: None,
            rate_limited_calls: 0,
            fail_when_contains: None,
        }
    }

    /// Fail the n-th embedding call (1-based) with a non-retryable error.
    pub(crate) fn fail_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    /// Answer the first `calls` embedding calls with a rate-limit error.
    pub(crate) fn rate_limited_for(mut self, calls: usize) -> Self {
        self.rate_limited_calls = calls;
        self
    }

    /// Fail every embedding of text containing `needle`.
    pub(crate) fn fail_when_contains(mut self, needle: &str) -> Self {
        self.fail_when_contains = Some(needle.to_string());
        self
    }

    pub(crate) fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ProviderError> {
        self.inner.chat(messages).await
    }

    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<ChatStream, ProviderError> {
        self.inner.chat_stream(messages).await
    }

    async fn generate_embedding(&self, text: &str) -> Result<EmbeddingResponse, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.rate_limited_calls {
            return Err(ProviderError::rate_limited("scripted", Duration::from_secs(1)));
        }
        if self.fail_on_call == Some(call) {
            return Err(ProviderError::validation("scripted", "scripted failure"));
        }
        if let Some(needle) = &self.fail_when_contains
            && text.contains(needle.as_str())
        {
            return Err(ProviderError::validation("scripted", "poisoned text"));
        }
        self.inner.generate_embedding(text).await
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// In-memory store that counts every boundary call.
pub(crate) struct CountingStore {
    inner: InMemoryDocumentStore,
    begins: AtomicUsize,
    adds: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    fail_rollback: bool,
}

impl CountingStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: InMemoryDocumentStore::new(),
            begins: AtomicUsize::new(0),
            adds: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
            fail_rollback: false,
        }
    }

    pub(crate) fn fail_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    pub(crate) fn inner(&self) -> &InMemoryDocumentStore {
        &self.inner
    }

    /// `(begin, add, commit, rollback)` call counts.
    pub(crate) fn counts(&self) -> (usize, usize, usize, usize) {
        (
            self.begins.load(Ordering::SeqCst),
            self.adds.load(Ordering::SeqCst),
            self.commits.load(Ordering::SeqCst),
            self.rollbacks.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn begin_document_processing(
        &self,
        document: NewDocument,
    ) -> Result<StoredDocument, StoreError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        self.inner.begin_document_processing(document).await
    }

    async fn add_document_chunk(&self, chunk: NewChunk) -> Result<StoredChunk, StoreError> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        self.inner.add_document_chunk(chunk).await
    }

    async fn commit_document_processing(&self, document_id: &str) -> Result<(), StoreError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit_document_processing(document_id).await
    }

    async fn rollback_document_processing(&self, document_id: &str) -> Result<(), StoreError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.fail_rollback {
            return Err(StoreError::Backend("rollback unavailable".into()));
        }
        self.inner.rollback_document_processing(document_id).await
    }

    async fn match_documents(&self, query: &MatchQuery) -> Result<Vec<DocumentMatch>, StoreError> {
        self.inner.match_documents(query).await
    }
}
