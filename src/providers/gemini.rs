//! Google Gemini provider.
//!
//! Gemini differs from the OpenAI-compatible services in every wire detail: the API key
//! travels as a `key` query parameter, conversations are `contents` made of `parts`, the
//! assistant role is called `model`, system prompts go into `systemInstruction`, and streaming
//! emits JSON objects (newline-delimited or wrapped in a JSON array) instead of SSE.

use crate::providers::base::{ProviderCore, StreamBody};
use crate::providers::error::{ProviderError, RawProviderError, parse_provider_error};
use crate::providers::framing::{JsonObjectSplitter, LineBuffer};
use crate::providers::types::{
    ChatMessage, ChatResponse, ChatRole, ChatStream, ChatUsage, EmbeddingResponse,
    EmbeddingUsage, ProviderConfig, ProviderKind,
};
use crate::providers::{AiProvider, validate_messages, validate_text};
use crate::rate_limit::RateLimiter;
use async_stream::try_stream;
use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Client for the Gemini `generateContent` / `embedText` APIs.
pub struct GeminiProvider {
    core: ProviderCore,
}

impl GeminiProvider {
    /// Build a provider sharing `limiter` with its siblings.
    pub fn new(config: &ProviderConfig, limiter: Arc<RateLimiter>) -> Result<Self, ProviderError> {
        Ok(Self {
            core: ProviderCore::new(ProviderKind::Gemini, config, limiter)?,
        })
    }

    /// Operations currently in flight.
    pub fn active_requests(&self) -> usize {
        self.core.active_requests()
    }

    fn model_endpoint(&self, model: &str, method: &str) -> String {
        self.core.endpoint(&format!("models/{model}:{method}"))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Serialize)]
struct EmbedTextRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedTextResponse {
    embedding: Option<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    #[serde(default, alias = "values")]
    value: Vec<f32>,
}

fn build_request(messages: &[ChatMessage]) -> GenerateRequest {
    let mut system_parts = Vec::new();
    let mut contents = Vec::with_capacity(messages.len());
    for message in messages {
        match message.role {
            ChatRole::System => system_parts.push(Part {
                text: message.content.clone(),
            }),
            ChatRole::User | ChatRole::Assistant => contents.push(Content {
                role: Some(
                    if message.role == ChatRole::User {
                        "user"
                    } else {
                        "model"
                    }
                    .to_string(),
                ),
                parts: vec![Part {
                    text: message.content.clone(),
                }],
            }),
        }
    }
    GenerateRequest {
        contents,
        system_instruction: (!system_parts.is_empty()).then(|| Content {
            role: None,
            parts: system_parts,
        }),
    }
}

fn candidate_text(response: &GenerateResponse) -> Option<String> {
    let content = response.candidates.first()?.content.as_ref()?;
    Some(
        content
            .parts
            .iter()
            .map(|part| part.text.as_str())
            .collect::<String>(),
    )
}

/// Decode one streamed object into its text delta.
fn parse_stream_object(object: &str, provider: &str) -> Result<Option<String>, ProviderError> {
    let value: Value = serde_json::from_str(object).map_err(|error| {
        ProviderError::invalid_response(provider, format!("Malformed stream object: {error}"))
    })?;
    if value.get("error").is_some() {
        return Err(parse_provider_error(
            RawProviderError::Message(object.to_string()),
            provider,
        ));
    }
    let response: GenerateResponse = serde_json::from_value(value).map_err(|error| {
        ProviderError::invalid_response(provider, format!("Malformed stream object: {error}"))
    })?;
    Ok(candidate_text(&response).filter(|text| !text.is_empty()))
}

fn json_deltas(body: StreamBody, provider: &'static str) -> ChatStream {
    Box::pin(json_delta_stream(body, provider))
}

fn json_delta_stream(
    mut body: StreamBody,
    provider: &'static str,
) -> impl Stream<Item = Result<String, ProviderError>> + Send {
    try_stream! {
        let mut lines = LineBuffer::default();
        let mut splitter = JsonObjectSplitter::default();

        while let Some(bytes) = body.next_chunk().await? {
            for line in lines.push(&bytes) {
                for object in splitter.push(&line) {
                    if let Some(text) = parse_stream_object(&object, provider)? {
                        yield text;
                    }
                }
            }
        }

        if let Some(rest) = lines.finish() {
            for object in splitter.push(&rest) {
                if let Some(text) = parse_stream_object(&object, provider)? {
                    yield text;
                }
            }
        }
        if splitter.has_partial() {
            tracing::warn!(provider, "Stream ended inside a JSON object");
        }
        tracing::debug!(provider, "Stream finished");
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ProviderError> {
        validate_messages(messages, self.name())?;
        let body = build_request(messages);
        let url = self.model_endpoint(self.core.chat_model(), "generateContent");
        let response: GenerateResponse = self
            .core
            .send_json(|| {
                self.core
                    .http()
                    .post(&url)
                    .query(&[("key", self.core.api_key())])
                    .json(&body)
            })
            .await?;

        let content = candidate_text(&response).ok_or_else(|| {
            ProviderError::invalid_response(self.name(), "Gemini returned no candidates")
        })?;
        let usage = response.usage_metadata.unwrap_or_default();
        Ok(ChatResponse {
            content,
            usage: ChatUsage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count,
                total_tokens: usage.total_token_count,
            },
        })
    }

    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<ChatStream, ProviderError> {
        validate_messages(messages, self.name())?;
        let body = build_request(messages);
        let url = self.model_endpoint(self.core.chat_model(), "streamGenerateContent");
        let stream = self
            .core
            .open_stream(|| {
                self.core
                    .http()
                    .post(&url)
                    .query(&[("key", self.core.api_key())])
                    .json(&body)
            })
            .await?;
        Ok(json_deltas(stream, self.core.name()))
    }

    async fn generate_embedding(&self, text: &str) -> Result<EmbeddingResponse, ProviderError> {
        validate_text(text, self.name())?;
        let url = self.model_endpoint(self.core.embedding_model(), "embedText");
        let body = EmbedTextRequest { text };
        let response: EmbedTextResponse = self
            .core
            .send_json(|| {
                self.core
                    .http()
                    .post(&url)
                    .query(&[("key", self.core.api_key())])
                    .json(&body)
            })
            .await?;

        let embedding = response
            .embedding
            .map(|values| values.value)
            .filter(|values| !values.is_empty())
            .ok_or_else(|| {
                ProviderError::invalid_response(self.name(), "Gemini returned no embedding")
            })?;
        // embedText reports no usage; count whitespace-separated words instead.
        let words = u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX);
        Ok(EmbeddingResponse {
            embedding,
            usage: EmbeddingUsage {
                prompt_tokens: words,
                total_tokens: words,
            },
        })
    }

    fn is_available(&self) -> bool {
        self.core.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn provider(server: &MockServer) -> GeminiProvider {
        let config = ProviderConfig {
            base_url: Some(server.base_url()),
            is_test: true,
            ..ProviderConfig::new("gemini-key")
        };
        GeminiProvider::new(&config, Arc::new(RateLimiter::new())).expect("provider")
    }

    #[test]
    fn system_messages_become_system_instruction() {
        let request = build_request(&[
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
            ChatMessage::user("again"),
        ]);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(value["contents"][1]["role"], "model");
        assert_eq!(value["contents"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn chat_normalizes_candidates_and_usage() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/gemini-1.5-flash:generateContent")
                    .query_param("key", "gemini-key");
                then.status(200).json_body(json!({
                    "candidates": [{ "content": { "role": "model", "parts": [{ "text": "Hi " }, { "text": "there" }] } }],
                    "usageMetadata": { "promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5 }
                }));
            })
            .await;

        let response = provider(&server)
            .chat(&[ChatMessage::user("hello")])
            .await
            .expect("chat");

        mock.assert_async().await;
        assert_eq!(response.content, "Hi there");
        assert_eq!(response.usage.total_tokens, 5);
        assert_eq!(response.usage.completion_tokens, 2);
    }

    #[tokio::test]
    async fn stream_parses_array_framed_objects() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/gemini-1.5-flash:streamGenerateContent");
                then.status(200).body(
                    "[{\"candidates\": [{\"content\": {\"parts\": [{\"text\": \"Hel\"}]}}]}\n,\r\n{\"candidates\": [{\"content\": {\"parts\": [{\"text\": \"lo\"}]}}]}\n]",
                );
            })
            .await;

        let provider = provider(&server);
        let stream = provider
            .chat_stream(&[ChatMessage::user("hello")])
            .await
            .expect("stream");
        let parts: Vec<String> = stream
            .map(|item| item.expect("delta"))
            .collect()
            .await;

        assert_eq!(parts, vec!["Hel", "lo"]);
        assert_eq!(provider.active_requests(), 0);
    }

    #[tokio::test]
    async fn stream_parses_newline_delimited_objects() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/gemini-1.5-flash:streamGenerateContent");
                then.status(200).body(concat!(
                    "{\"candidates\": [{\"content\": {\"parts\": [{\"text\": \"One \"}]}}]}\n",
                    "{\"candidates\": [{\"content\":\n {\"parts\": [{\"text\": \"two\"}]}}]}\n",
                    "{\"candidates\": [{\"finishReason\": \"STOP\"}]}\n",
                    "{\"candidates\": [{\"content\": {\"parts\": [{\"text\": \" three\"}]}}]}",
                ));
            })
            .await;

        let provider = provider(&server);
        let stream = provider
            .chat_stream(&[ChatMessage::user("count")])
            .await
            .expect("stream");
        let parts: Vec<String> = stream
            .map(|item| item.expect("delta"))
            .collect()
            .await;

        assert_eq!(parts, vec!["One ", "two", " three"]);
        assert_eq!(provider.active_requests(), 0);
    }

    #[tokio::test]
    async fn embedding_reads_value_array() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/embedding-gecko-001:embedText")
                    .json_body(json!({ "text": "some words here" }));
                then.status(200)
                    .json_body(json!({ "embedding": { "value": [0.25, -0.5, 1.0] } }));
            })
            .await;

        let response = provider(&server)
            .generate_embedding("some words here")
            .await
            .expect("embedding");
        assert_eq!(response.embedding, vec![0.25, -0.5, 1.0]);
        assert_eq!(response.usage.prompt_tokens, 3);
    }

    #[tokio::test]
    async fn resource_exhausted_surfaces_as_rate_limit() {
        let server = MockServer::start_async().await;
        let config = ProviderConfig {
            base_url: Some(server.base_url()),
            is_test: true,
            retry_config: Some(crate::retry::RetryConfig {
                max_retries: 1,
                ..Default::default()
            }),
            ..ProviderConfig::new("gemini-key")
        };
        let provider =
            GeminiProvider::new(&config, Arc::new(RateLimiter::new())).expect("provider");
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/gemini-1.5-flash:generateContent");
                then.status(429).json_body(json!({
                    "error": { "code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED" }
                }));
            })
            .await;

        let error = provider
            .chat(&[ChatMessage::user("hello")])
            .await
            .unwrap_err();
        assert_eq!(error.kind, crate::providers::ProviderErrorKind::RateLimit);
        mock.assert_hits_async(2).await;
    }

    #[test]
    fn stream_object_without_text_is_skipped() {
        let text = parse_stream_object(r#"{"candidates": [{"finishReason": "STOP"}]}"#, "gemini")
            .expect("parsed");
        assert_eq!(text, None);
    }
}
