//! Groq provider (OpenAI-compatible wire format under `/openai/v1`).

use crate::providers::base::ProviderCore;
use crate::providers::error::ProviderError;
use crate::providers::openai_compat;
use crate::providers::types::{
    ChatMessage, ChatResponse, ChatStream, EmbeddingResponse, ProviderConfig, ProviderKind,
};
use crate::providers::{AiProvider, validate_messages, validate_text};
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use std::sync::Arc;

/// Client for the Groq chat-completion and embedding APIs.
pub struct GroqProvider {
    core: ProviderCore,
}

impl GroqProvider {
    /// Build a provider sharing `limiter` with its siblings.
    pub fn new(config: &ProviderConfig, limiter: Arc<RateLimiter>) -> Result<Self, ProviderError> {
        Ok(Self {
            core: ProviderCore::new(ProviderKind::Groq, config, limiter)?,
        })
    }

    /// Operations currently in flight.
    pub fn active_requests(&self) -> usize {
        self.core.active_requests()
    }
}

#[async_trait]
impl AiProvider for GroqProvider {
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ProviderError> {
        validate_messages(messages, self.name())?;
        openai_compat::chat(&self.core, messages).await
    }

    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<ChatStream, ProviderError> {
        validate_messages(messages, self.name())?;
        openai_compat::chat_stream(&self.core, messages).await
    }

    async fn generate_embedding(&self, text: &str) -> Result<EmbeddingResponse, ProviderError> {
        validate_text(text, self.name())?;
        openai_compat::embed(&self.core, text).await
    }

    fn is_available(&self) -> bool {
        self.core.is_available()
    }
}
