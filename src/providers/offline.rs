//! Deterministic provider that never touches the network.
//!
//! Embeddings hash the input bytes into a fixed number of slots and L2-normalize the result, so
//! identical texts always embed identically and similar texts land close together. Chat echoes
//! the last message back. Used by the CLI when no API key is configured and throughout tests.

use crate::providers::types::{
    ChatMessage, ChatResponse, ChatStream, ChatUsage, EmbeddingResponse, EmbeddingUsage,
};
use crate::providers::{AiProvider, ProviderError, validate_messages, validate_text};
use async_trait::async_trait;

/// Default embedding width.
pub const DEFAULT_OFFLINE_DIMENSION: usize = 256;

/// Hash-embedding, echo-chat provider.
#[derive(Debug, Clone)]
pub struct OfflineProvider {
    dimension: usize,
}

impl OfflineProvider {
    /// Provider producing vectors of `dimension` floats.
    pub fn new(dimension: usize) -> Result<Self, ProviderError> {
        if dimension == 0 {
            return Err(ProviderError::configuration(
                "offline",
                "embedding dimension must be greater than zero",
            ));
        }
        Ok(Self { dimension })
    }

    /// Embedding width.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        for (idx, byte) in text.bytes().enumerate() {
            embedding[idx % self.dimension] += f32::from(byte) / 255.0;
        }

        let norm = embedding.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        embedding
    }

    fn reply(messages: &[ChatMessage]) -> String {
        messages
            .last()
            .map(|message| message.content.trim().to_string())
            .unwrap_or_default()
    }
}

impl Default for OfflineProvider {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_OFFLINE_DIMENSION,
        }
    }
}

fn word_count(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}

#[async_trait]
impl AiProvider for OfflineProvider {
    fn name(&self) -> &str {
        "offline"
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ProviderError> {
        validate_messages(messages, self.name())?;
        let content = Self::reply(messages);
        let prompt_tokens = messages
            .iter()
            .map(|message| word_count(&message.content))
            .sum::<u32>();
        let completion_tokens = word_count(&content);
        Ok(ChatResponse {
            content,
            usage: ChatUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        })
    }

    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<ChatStream, ProviderError> {
        validate_messages(messages, self.name())?;
        let reply = Self::reply(messages);
        let mut pieces: Vec<String> = Vec::new();
        for (idx, word) in reply.split_whitespace().enumerate() {
            if idx == 0 {
                pieces.push(word.to_string());
            } else {
                pieces.push(format!(" {word}"));
            }
        }
        Ok(Box::pin(futures_util::stream::iter(
            pieces.into_iter().map(Ok),
        )))
    }

    async fn generate_embedding(&self, text: &str) -> Result<EmbeddingResponse, ProviderError> {
        validate_text(text, self.name())?;
        let tokens = word_count(text);
        Ok(EmbeddingResponse {
            embedding: self.encode(text),
            usage: EmbeddingUsage {
                prompt_tokens: tokens,
                total_tokens: tokens,
            },
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}
