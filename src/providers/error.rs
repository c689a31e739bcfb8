//! Provider error taxonomy.
//!
//! Upstream services report failures in different shapes (OpenAI-style
//! `{"error": {"message", "type", "code"}}`, Google-style `{"error": {"code", "message",
//! "status"}}`, bare strings, transport failures). [`parse_provider_error`] folds all of them
//! into a [`ProviderError`] with a [`ProviderErrorKind`] and a retryable flag.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Input rejected before any request was sent.
    Validation,
    /// Upstream or local rate limit hit.
    RateLimit,
    /// Request exceeded its time budget.
    Timeout,
    /// Connection-level failure.
    NetworkError,
    /// Upstream returned a 5xx status.
    InternalServerError,
    /// Local in-flight request cap reached.
    ConcurrencyLimit,
    /// Upstream answered with a body we could not interpret.
    InvalidResponse,
    /// Provider could not be constructed from its configuration.
    Configuration,
    /// Anything else; treated as permanent.
    Unknown,
}

impl ProviderErrorKind {
    /// Label fed to the retry handler when classifying this kind.
    pub fn label(self) -> &'static str {
        match self {
            Self::Validation => "validation error",
            Self::RateLimit => "rate limit exceeded",
            Self::Timeout => "timeout",
            Self::NetworkError => "network error",
            Self::InternalServerError => "server error",
            Self::ConcurrencyLimit => "concurrency limit",
            Self::InvalidResponse => "invalid response",
            Self::Configuration => "configuration error",
            Self::Unknown => "unknown error",
        }
    }
}

/// Normalized failure raised by a provider.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct ProviderError {
    /// Human-readable description.
    pub message: String,
    /// Name of the provider that raised the error.
    pub provider: String,
    /// Whether the failure is transient.
    pub retryable: bool,
    /// Classification of the failure.
    pub kind: ProviderErrorKind,
    /// HTTP status, when one was involved.
    pub status: Option<u16>,
    /// Suggested wait before retrying, for rate limits.
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    /// Build an error with an explicit classification.
    pub fn new(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            message: message.into(),
            provider: provider.into(),
            retryable,
            kind,
            status: None,
            retry_after: None,
        }
    }

    /// Invalid caller input (empty prompt, empty text).
    pub fn validation(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Validation, message, false)
    }

    /// Local token bucket exhausted.
    pub fn rate_limited(provider: impl Into<String>, retry_after: Duration) -> Self {
        let provider = provider.into();
        let message = format!("Rate limit exceeded for {provider}");
        let mut error = Self::new(provider, ProviderErrorKind::RateLimit, message, true);
        error.status = Some(429);
        error.retry_after = Some(retry_after);
        error
    }

    /// Local in-flight cap reached.
    pub fn too_many_concurrent(provider: impl Into<String>) -> Self {
        Self::new(
            provider,
            ProviderErrorKind::ConcurrencyLimit,
            "Too many concurrent requests",
            false,
        )
    }

    /// Request exceeded its time budget.
    pub fn timeout(provider: impl Into<String>, after: Duration) -> Self {
        Self::new(
            provider,
            ProviderErrorKind::Timeout,
            format!("Request timeout after {}ms", after.as_millis()),
            true,
        )
    }

    /// Response body could not be decoded.
    pub fn invalid_response(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::InvalidResponse, message, false)
    }

    /// Provider construction failed.
    pub fn configuration(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Configuration, message, false)
    }

    /// Attach an HTTP status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Label used by the retry handler for this error.
    ///
    /// Retryable errors map to their kind label; permanent ones map to a label that never
    /// matches a retryable marker, whatever their message says.
    pub fn classification(&self) -> String {
        if self.retryable {
            match self.kind {
                ProviderErrorKind::RateLimit
                | ProviderErrorKind::Timeout
                | ProviderErrorKind::NetworkError
                | ProviderErrorKind::InternalServerError => self.kind.label().to_string(),
                _ => "service unavailable".to_string(),
            }
        } else {
            self.kind.label().to_string()
        }
    }
}

/// Failure as observed at the transport boundary, before normalization.
#[derive(Debug)]
pub enum RawProviderError {
    /// Upstream answered with a non-success status.
    Response {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },
    /// The request never produced a response.
    Transport(reqwest::Error),
    /// Free-form error text, e.g. an `error` object embedded in a stream.
    Message(String),
}

const NETWORK_MARKERS: [&str; 7] = [
    "econnreset",
    "econnrefused",
    "enotfound",
    "socket hang up",
    "network",
    "connection refused",
    "connection reset",
];

/// Whether an error should be retried, judged from its flag, message and status.
pub fn is_retryable_error(error: &ProviderError) -> bool {
    if error.retryable || error.status == Some(429) {
        return true;
    }
    let message = error.message.to_lowercase();
    [
        "rate limit",
        "quota exceeded",
        "timeout",
        "econnreset",
        "socket hang up",
        "service unavailable",
    ]
    .iter()
    .any(|marker| message.contains(marker))
}

/// Normalize a raw upstream failure into a [`ProviderError`].
pub fn parse_provider_error(raw: RawProviderError, provider: &str) -> ProviderError {
    match raw {
        RawProviderError::Response { status, body } => {
            let (message, upstream_status) = extract_error_details(&body);
            let message = message.unwrap_or_else(|| {
                if body.trim().is_empty() {
                    format!("HTTP {status}")
                } else {
                    body.trim().to_string()
                }
            });
            classify(provider, message, Some(status), upstream_status.as_deref())
        }
        RawProviderError::Transport(error) => {
            if error.is_timeout() {
                let mut parsed = ProviderError::new(
                    provider,
                    ProviderErrorKind::Timeout,
                    format!("Request timeout: {error}"),
                    true,
                );
                parsed.status = error.status().map(|status| status.as_u16());
                return parsed;
            }
            if error.is_connect() || error.is_request() || error.is_body() {
                return ProviderError::new(
                    provider,
                    ProviderErrorKind::NetworkError,
                    format!("Network error: {error}"),
                    true,
                );
            }
            if error.is_decode() {
                return ProviderError::invalid_response(
                    provider,
                    format!("Failed to decode response: {error}"),
                );
            }
            let status = error.status().map(|status| status.as_u16());
            classify(provider, error.to_string(), status, None)
        }
        RawProviderError::Message(text) => match serde_json::from_str::<Value>(&text) {
            Ok(value) => {
                let (message, upstream_status) = error_fields(&value);
                let numeric = error_code(&value);
                classify(
                    provider,
                    message.unwrap_or(text),
                    numeric,
                    upstream_status.as_deref(),
                )
            }
            Err(_) => classify(provider, text, None, None),
        },
    }
}

fn classify(
    provider: &str,
    message: String,
    status: Option<u16>,
    upstream_status: Option<&str>,
) -> ProviderError {
    let lowered = message.to_lowercase();
    let upstream = upstream_status.unwrap_or_default().to_lowercase();

    if status == Some(429)
        || lowered.contains("rate limit")
        || lowered.contains("quota")
        || upstream == "resource_exhausted"
    {
        let mut error = ProviderError::new(provider, ProviderErrorKind::RateLimit, message, true);
        error.status = Some(429);
        return error;
    }

    if lowered.contains("timeout") || lowered.contains("timed out") {
        let mut error = ProviderError::new(provider, ProviderErrorKind::Timeout, message, true);
        error.status = status;
        return error;
    }

    if let Some(code) = status
        && code >= 500
    {
        return ProviderError::new(
            provider,
            ProviderErrorKind::InternalServerError,
            message,
            true,
        )
        .with_status(code);
    }

    if NETWORK_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        let mut error =
            ProviderError::new(provider, ProviderErrorKind::NetworkError, message, true);
        error.status = status;
        return error;
    }

    let mut error = ProviderError::new(provider, ProviderErrorKind::Unknown, message, false);
    error.status = status;
    error
}

fn extract_error_details(body: &str) -> (Option<String>, Option<String>) {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => error_fields(&value),
        Err(_) => (None, None),
    }
}

/// Pull `message` and string `status` out of the known error envelopes.
fn error_fields(value: &Value) -> (Option<String>, Option<String>) {
    match value {
        Value::Array(items) => items
            .first()
            .map(error_fields)
            .unwrap_or((None, None)),
        Value::Object(map) => match map.get("error") {
            Some(Value::Object(inner)) => (
                inner
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                inner
                    .get("status")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            ),
            Some(Value::String(message)) => (Some(message.clone()), None),
            _ => (
                map.get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                map.get("status").and_then(Value::as_str).map(str::to_string),
            ),
        },
        _ => (None, None),
    }
}

fn error_code(value: &Value) -> Option<u16> {
    let inner = match value {
        Value::Array(items) => items.first()?.get("error")?,
        Value::Object(map) => map.get("error").unwrap_or(value),
        _ => return None,
    };
    inner
        .get("code")
        .or_else(|| inner.get("status"))
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
}
