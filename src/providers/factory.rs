//! Provider registry.
//!
//! The factory is an explicit object rather than a process global: construct one at startup
//! and share it. Instances are memoized by `"{kind}:{api_key}"`, so the same credentials always
//! yield the same `Arc`, and every instance shares the factory's [`RateLimiter`].

use crate::providers::error::ProviderError;
use crate::providers::types::{ProviderConfig, ProviderKind, UnknownProviderType};
use crate::providers::{AiProvider, DeepseekProvider, GeminiProvider, GroqProvider};
use crate::rate_limit::RateLimiter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Errors raised while resolving providers.
#[derive(Debug, Error)]
pub enum FactoryError {
    /// Requested provider name is not supported.
    #[error(transparent)]
    UnknownProvider(#[from] UnknownProviderType),
    /// Every candidate reported no capacity.
    #[error("No available AI providers found")]
    NoAvailableProvider,
    /// Provider construction failed.
    #[error("Failed to construct provider: {0}")]
    Provider(#[from] ProviderError),
}

/// Memoizing registry of provider instances.
pub struct ProviderFactory {
    providers: Mutex<HashMap<String, Arc<dyn AiProvider>>>,
    rate_limiter: Arc<RateLimiter>,
}

impl ProviderFactory {
    /// Registry with its own rate limiter.
    pub fn new() -> Self {
        Self::with_rate_limiter(Arc::new(RateLimiter::new()))
    }

    /// Registry whose providers share `rate_limiter`.
    pub fn with_rate_limiter(rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            rate_limiter,
        }
    }

    /// Limiter shared by every provider this factory builds.
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Resolve a provider by name, e.g. `"deepseek"`.
    pub fn get_provider(
        &self,
        provider_type: &str,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn AiProvider>, FactoryError> {
        let kind: ProviderKind = provider_type.parse()?;
        self.provider(kind, config)
    }

    /// Resolve a provider by kind, constructing it on first use.
    pub fn provider(
        &self,
        kind: ProviderKind,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn AiProvider>, FactoryError> {
        let key = format!("{kind}:{}", config.api_key);
        let mut providers = self
            .providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = providers.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let limiter = Arc::clone(&self.rate_limiter);
        let provider: Arc<dyn AiProvider> = match kind {
            ProviderKind::Deepseek => Arc::new(DeepseekProvider::new(config, limiter)?),
            ProviderKind::Groq => Arc::new(GroqProvider::new(config, limiter)?),
            ProviderKind::Gemini => Arc::new(GeminiProvider::new(config, limiter)?),
        };
        tracing::debug!(provider = %kind, cached = providers.len() + 1, "Registered provider instance");
        providers.insert(key, Arc::clone(&provider));
        Ok(provider)
    }

    /// First available provider in preference order, all built from `config`.
    pub fn get_available_provider(
        &self,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn AiProvider>, FactoryError> {
        self.get_available_provider_from(
            ProviderKind::PREFERENCE
                .iter()
                .map(|kind| (*kind, config.clone())),
        )
    }

    /// First available provider among explicit `(kind, config)` candidates, polled in order.
    pub fn get_available_provider_from<I>(
        &self,
        candidates: I,
    ) -> Result<Arc<dyn AiProvider>, FactoryError>
    where
        I: IntoIterator<Item = (ProviderKind, ProviderConfig)>,
    {
        for (kind, config) in candidates {
            let provider = self.provider(kind, &config)?;
            if provider.is_available() {
                tracing::debug!(provider = %kind, "Selected available provider");
                return Ok(provider);
            }
            tracing::debug!(provider = %kind, "Provider unavailable; trying next");
        }
        Err(FactoryError::NoAvailableProvider)
    }

    /// Number of memoized instances.
    pub fn len(&self) -> usize {
        self.providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no instance has been built yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}
