//! Wire mapping for OpenAI-compatible APIs (Deepseek, Groq).

use crate::providers::base::{ProviderCore, StreamBody};
use crate::providers::error::{ProviderError, RawProviderError, parse_provider_error};
use crate::providers::framing::LineBuffer;
use crate::providers::types::{
    ChatMessage, ChatResponse, ChatStream, ChatUsage, EmbeddingResponse, EmbeddingUsage,
};
use async_stream::try_stream;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: Option<CompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<EmbeddingsUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingsUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

pub(crate) async fn chat(
    core: &ProviderCore,
    messages: &[ChatMessage],
) -> Result<ChatResponse, ProviderError> {
    let body = ChatRequest {
        model: core.chat_model(),
        messages,
        stream: false,
    };
    let url = core.endpoint("chat/completions");
    let response: CompletionResponse = core
        .send_json(|| {
            core.http()
                .post(&url)
                .bearer_auth(core.api_key())
                .json(&body)
        })
        .await?;

    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .ok_or_else(|| {
            ProviderError::invalid_response(core.name(), "Response contained no choices")
        })?;
    let usage = response.usage.unwrap_or_default();

    Ok(ChatResponse {
        content,
        usage: ChatUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        },
    })
}

pub(crate) async fn chat_stream(
    core: &ProviderCore,
    messages: &[ChatMessage],
) -> Result<ChatStream, ProviderError> {
    let body = ChatRequest {
        model: core.chat_model(),
        messages,
        stream: true,
    };
    let url = core.endpoint("chat/completions");
    let stream = core
        .open_stream(|| {
            core.http()
                .post(&url)
                .bearer_auth(core.api_key())
                .json(&body)
        })
        .await?;
    Ok(sse_deltas(stream, core.name()))
}

pub(crate) async fn embed(
    core: &ProviderCore,
    text: &str,
) -> Result<EmbeddingResponse, ProviderError> {
    let body = EmbeddingRequest {
        model: core.embedding_model(),
        input: text,
    };
    let url = core.endpoint("embeddings");
    let response: EmbeddingsResponse = core
        .send_json(|| {
            core.http()
                .post(&url)
                .bearer_auth(core.api_key())
                .json(&body)
        })
        .await?;

    let embedding = response
        .data
        .into_iter()
        .next()
        .map(|data| data.embedding)
        .filter(|embedding| !embedding.is_empty())
        .ok_or_else(|| {
            ProviderError::invalid_response(core.name(), "Response contained no embedding")
        })?;
    let usage = response.usage.unwrap_or_default();

    Ok(EmbeddingResponse {
        embedding,
        usage: EmbeddingUsage {
            prompt_tokens: usage.prompt_tokens,
            total_tokens: usage.total_tokens,
        },
    })
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str, provider: &str) -> Result<SseEvent, ProviderError> {
    let line = line.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(SseEvent::Skip);
    }
    if payload == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let value: Value = serde_json::from_str(payload).map_err(|error| {
        ProviderError::invalid_response(provider, format!("Malformed stream event: {error}"))
    })?;
    if value.get("error").is_some() {
        return Err(parse_provider_error(
            RawProviderError::Message(payload.to_string()),
            provider,
        ));
    }
    let chunk: StreamChunk = serde_json::from_value(value).map_err(|error| {
        ProviderError::invalid_response(provider, format!("Malformed stream event: {error}"))
    })?;
    let delta = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty());
    Ok(delta.map_or(SseEvent::Skip, SseEvent::Delta))
}

/// Turn an SSE response into a stream of content deltas, stopping at `[DONE]`.
fn sse_deltas(body: StreamBody, provider: &'static str) -> ChatStream {
    Box::pin(sse_delta_stream(body, provider))
}

fn sse_delta_stream(
    mut body: StreamBody,
    provider: &'static str,
) -> impl Stream<Item = Result<String, ProviderError>> + Send {
    try_stream! {
        let mut lines = LineBuffer::default();
        let mut done = false;

        while !done {
            let Some(bytes) = body.next_chunk().await? else {
                break;
            };
            for line in lines.push(&bytes) {
                match parse_sse_line(&line, provider)? {
                    SseEvent::Delta(text) => yield text,
                    SseEvent::Done => {
                        done = true;
                        break;
                    }
                    SseEvent::Skip => {}
                }
            }
        }

        if !done {
            if let Some(line) = lines.finish() {
                if let SseEvent::Delta(text) = parse_sse_line(&line, provider)? {
                    yield text;
                }
            }
        }
        tracing::debug!(provider, "Stream finished");
    }
}
