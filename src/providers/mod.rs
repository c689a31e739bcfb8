//! Chat and embedding providers behind one interface.
//!
//! Each concrete provider composes a shared request core (retries, token-bucket rate limiting,
//! in-flight cap, timeouts) with its own wire mapping. [`ProviderFactory`] memoizes instances
//! and picks the first provider with spare capacity.

mod base;
pub mod deepseek;
pub mod error;
pub mod factory;
mod framing;
pub mod gemini;
pub mod groq;
pub mod offline;
mod openai_compat;
pub mod types;

use async_trait::async_trait;

pub use deepseek::DeepseekProvider;
pub use error::{
    ProviderError, ProviderErrorKind, RawProviderError, is_retryable_error, parse_provider_error,
};
pub use factory::{FactoryError, ProviderFactory};
pub use gemini::GeminiProvider;
pub use groq::GroqProvider;
pub use offline::OfflineProvider;
pub use types::{
    ChatMessage, ChatResponse, ChatRole, ChatStream, ChatUsage, EmbeddingResponse,
    EmbeddingUsage, ProviderConfig, ProviderKind,
};

/// Uniform interface over remote chat/embedding services.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Provider name used in errors, logs and rate-limiter keys.
    fn name(&self) -> &str;

    /// Complete a conversation.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ProviderError>;

    /// Complete a conversation, yielding text deltas as they arrive.
    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<ChatStream, ProviderError>;

    /// Embed a single text.
    async fn generate_embedding(&self, text: &str) -> Result<EmbeddingResponse, ProviderError>;

    /// Whether the provider has rate-limit capacity right now.
    fn is_available(&self) -> bool;
}

/// Reject empty conversations and conversations whose last message is blank.
pub(crate) fn validate_messages(
    messages: &[ChatMessage],
    provider: &str,
) -> Result<(), ProviderError> {
    match messages.last() {
        Some(last) if !last.content.trim().is_empty() => Ok(()),
        _ => Err(ProviderError::validation(provider, "Empty prompt")),
    }
}

/// Reject blank embedding input.
pub(crate) fn validate_text(text: &str, provider: &str) -> Result<(), ProviderError> {
    if text.trim().is_empty() {
        return Err(ProviderError::validation(provider, "Empty text"));
    }
    Ok(())
}
