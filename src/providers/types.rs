//! Provider-neutral request and response types.

use crate::providers::error::ProviderError;
use crate::rate_limit::RateLimitConfig;
use crate::retry::RetryConfig;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions framing the conversation.
    System,
    /// End-user turn.
    User,
    /// Model turn.
    Assistant,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author of the message.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// System message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Token accounting for a chat completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChatUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens produced by the completion.
    pub completion_tokens: u32,
    /// Sum of both.
    pub total_tokens: u32,
}

/// Result of one chat call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatResponse {
    /// Completion text.
    pub content: String,
    /// Token accounting.
    pub usage: ChatUsage,
}

/// Token accounting for an embedding call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddingUsage {
    /// Tokens consumed by the input.
    pub prompt_tokens: u32,
    /// Total billed tokens.
    pub total_tokens: u32,
}

/// Result of one embedding call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingResponse {
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// Token accounting.
    pub usage: EmbeddingUsage,
}

/// Lazy, forward-only sequence of completion deltas.
///
/// Dropping the stream releases the underlying HTTP response and the provider's in-flight
/// slot.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Construction parameters for a provider instance.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    /// Credential sent upstream.
    pub api_key: String,
    /// Retry immediately instead of backing off (test runs).
    pub is_test: bool,
    /// Backoff parameters; provider defaults apply when absent.
    pub retry_config: Option<RetryConfig>,
    /// In-flight operation cap.
    pub max_concurrent_requests: Option<usize>,
    /// Per-request time budget.
    pub timeout: Option<Duration>,
    /// Override for the upstream base URL.
    pub base_url: Option<String>,
    /// Override for the chat model.
    pub model: Option<String>,
    /// Override for the embedding model.
    pub embedding_model: Option<String>,
}

impl ProviderConfig {
    /// Config carrying only an API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }
}

/// Default in-flight operation cap.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 5;
/// Default per-request time budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Closed set of supported upstream services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Deepseek (OpenAI-compatible wire format).
    Deepseek,
    /// Groq (OpenAI-compatible wire format).
    Groq,
    /// Google Gemini.
    Gemini,
}

impl ProviderKind {
    /// Order in which providers are polled for availability.
    pub const PREFERENCE: [ProviderKind; 3] = [Self::Deepseek, Self::Groq, Self::Gemini];

    /// Stable lowercase name, also used as the rate-limiter key.
    pub fn name(self) -> &'static str {
        match self {
            Self::Deepseek => "deepseek",
            Self::Groq => "groq",
            Self::Gemini => "gemini",
        }
    }

    /// Public API base URL.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Deepseek => "https://api.deepseek.com/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    /// Chat model used when none is configured.
    pub fn default_chat_model(self) -> &'static str {
        match self {
            Self::Deepseek => "deepseek-chat",
            Self::Groq => "llama-3.1-8b-instant",
            Self::Gemini => "gemini-1.5-flash",
        }
    }

    /// Embedding model used when none is configured.
    pub fn default_embedding_model(self) -> &'static str {
        match self {
            Self::Deepseek => "deepseek-embedding",
            Self::Groq => "nomic-embed-text-v1_5",
            Self::Gemini => "embedding-gecko-001",
        }
    }

    /// Token bucket installed for the provider on first construction.
    pub fn default_rate_limit(self) -> RateLimitConfig {
        match self {
            Self::Deepseek => RateLimitConfig {
                requests_per_minute: 60,
                burst_limit: 10,
                retry_after: Duration::from_secs(1),
            },
            Self::Groq => RateLimitConfig {
                requests_per_minute: 30,
                burst_limit: 5,
                retry_after: Duration::from_secs(2),
            },
            Self::Gemini => RateLimitConfig {
                requests_per_minute: 60,
                burst_limit: 10,
                retry_after: Duration::from_secs(1),
            },
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned by [`ProviderKind::from_str`] for unrecognized names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown provider type: {0}")]
pub struct UnknownProviderType(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProviderType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deepseek" => Ok(Self::Deepseek),
            "groq" => Ok(Self::Groq),
            "gemini" => Ok(Self::Gemini),
            _ => Err(UnknownProviderType(s.to_string())),
        }
    }
}
