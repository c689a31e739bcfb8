//! Shared request plumbing composed into every concrete provider.
//!
//! [`ProviderCore`] owns the HTTP client, the retry handler, a handle to the shared rate
//! limiter and the in-flight counter. Concrete providers only build requests and map wire
//! formats; everything else goes through here.

use crate::providers::error::{ProviderError, RawProviderError, parse_provider_error};
use crate::providers::types::{
    DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_TIMEOUT, ProviderConfig, ProviderKind,
};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryHandler;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Holds one in-flight slot; released on drop.
#[derive(Debug)]
pub(crate) struct ActiveRequestGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Streaming response body holding its in-flight slot until dropped.
#[derive(Debug)]
pub(crate) struct StreamBody {
    response: Response,
    read_timeout: Duration,
    provider: &'static str,
    _guard: ActiveRequestGuard,
}

impl StreamBody {
    /// Next body chunk, or `None` at end of stream. Each read gets the full request timeout, so
    /// a stalled body fails with a retryable `Timeout` instead of hanging.
    pub(crate) async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ProviderError> {
        let chunk = tokio::time::timeout(self.read_timeout, self.response.chunk())
            .await
            .map_err(|_| ProviderError::timeout(self.provider, self.read_timeout))?
            .map_err(|error| {
                parse_provider_error(RawProviderError::Transport(error), self.provider)
            })?;
        Ok(chunk.map(|bytes| bytes.to_vec()))
    }
}

pub(crate) struct ProviderCore {
    kind: ProviderKind,
    http: Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    embedding_model: String,
    timeout: Duration,
    retry: RetryHandler,
    limiter: Arc<RateLimiter>,
    active_requests: Arc<AtomicUsize>,
    max_concurrent_requests: usize,
}

impl ProviderCore {
    pub(crate) fn new(
        kind: ProviderKind,
        config: &ProviderConfig,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .user_agent(concat!("docpipe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| {
                ProviderError::configuration(
                    kind.name(),
                    format!("Failed to build HTTP client: {error}"),
                )
            })?;

        if !limiter.is_configured(kind.name()) {
            limiter.set_config(kind.name(), kind.default_rate_limit());
        }

        let mut retry = RetryHandler::new(config.retry_config.clone().unwrap_or_default());
        if config.is_test {
            retry = retry.without_delays();
        }

        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(kind.default_base_url())
            .trim_end_matches('/')
            .to_string();

        tracing::debug!(
            provider = %kind,
            base_url = %base_url,
            has_api_key = !config.api_key.is_empty(),
            "Initialized provider"
        );

        Ok(Self {
            kind,
            http,
            api_key: config.api_key.clone(),
            base_url,
            chat_model: config
                .model
                .clone()
                .unwrap_or_else(|| kind.default_chat_model().to_string()),
            embedding_model: config
                .embedding_model
                .clone()
                .unwrap_or_else(|| kind.default_embedding_model().to_string()),
            timeout: config.timeout.unwrap_or(DEFAULT_TIMEOUT),
            retry,
            limiter,
            active_requests: Arc::new(AtomicUsize::new(0)),
            max_concurrent_requests: config
                .max_concurrent_requests
                .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS)
                .max(1),
        })
    }

    pub(crate) fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn chat_model(&self) -> &str {
        &self.chat_model
    }

    pub(crate) fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::SeqCst)
    }

    /// Capacity check; never consumes a token.
    pub(crate) fn is_available(&self) -> bool {
        match self.limiter.get_retry_after(self.name()) {
            Ok(wait) => wait.is_zero(),
            Err(error) => {
                tracing::debug!(provider = self.name(), error = %error, "Availability check failed");
                false
            }
        }
    }

    pub(crate) fn acquire(&self) -> Result<ActiveRequestGuard, ProviderError> {
        let max = self.max_concurrent_requests;
        self.active_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < max).then_some(current + 1)
            })
            .map_err(|_| {
                tracing::warn!(provider = self.name(), max, "Rejected request over concurrency cap");
                ProviderError::too_many_concurrent(self.name())
            })?;
        Ok(ActiveRequestGuard {
            counter: Arc::clone(&self.active_requests),
        })
    }

    fn check_rate_limit(&self) -> Result<(), ProviderError> {
        let allowed = self
            .limiter
            .check_limit(self.name())
            .map_err(|error| ProviderError::configuration(self.name(), error.to_string()))?;
        if allowed {
            return Ok(());
        }
        let retry_after = self
            .limiter
            .get_retry_after(self.name())
            .unwrap_or_default();
        tracing::debug!(
            provider = self.name(),
            retry_after_ms = retry_after.as_millis() as u64,
            "Local rate limit reached"
        );
        Err(ProviderError::rate_limited(self.name(), retry_after))
    }

    /// Send a JSON request with rate limiting, retries and the concurrency guard, decoding the
    /// success body as `R`. `build` is invoked once per attempt.
    pub(crate) async fn send_json<R, B>(&self, build: B) -> Result<R, ProviderError>
    where
        R: DeserializeOwned,
        B: Fn() -> RequestBuilder,
    {
        let _guard = self.acquire()?;
        let build = &build;
        let core = self;
        self.retry
            .execute_with(
                move || async move {
                    core.check_rate_limit()?;
                    let response = build()
                        .timeout(core.timeout)
                        .send()
                        .await
                        .map_err(|error| core.transport_error(error))?;
                    let response = core.ensure_success(response).await?;
                    response.json::<R>().await.map_err(|error| {
                        ProviderError::invalid_response(
                            core.name(),
                            format!("Failed to decode {} response: {error}", core.name()),
                        )
                    })
                },
                ProviderError::classification,
            )
            .await
    }

    /// Open a streaming response. The timeout bounds the wait for headers and then every
    /// individual body read, not the stream as a whole.
    pub(crate) async fn open_stream<B>(&self, build: B) -> Result<StreamBody, ProviderError>
    where
        B: FnOnce() -> RequestBuilder,
    {
        let guard = self.acquire()?;
        self.check_rate_limit()?;
        let response = tokio::time::timeout(self.timeout, build().send())
            .await
            .map_err(|_| ProviderError::timeout(self.name(), self.timeout))?
            .map_err(|error| self.transport_error(error))?;
        let response = self.ensure_success(response).await?;
        Ok(StreamBody {
            response,
            read_timeout: self.timeout,
            provider: self.name(),
            _guard: guard,
        })
    }

    pub(crate) fn transport_error(&self, error: reqwest::Error) -> ProviderError {
        parse_provider_error(RawProviderError::Transport(error), self.name())
    }

    async fn ensure_success(&self, response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let error = parse_provider_error(
            RawProviderError::Response {
                status: status.as_u16(),
                body,
            },
            self.name(),
        );
        tracing::warn!(
            provider = self.name(),
            status = status.as_u16(),
            retryable = error.retryable,
            error = %error,
            "Provider request failed"
        );
        Err(error)
    }
}
