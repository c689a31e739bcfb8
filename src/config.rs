use crate::processing::ChunkerConfig;
use crate::processing::chunking::{
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_MIN_CHUNK_LENGTH,
};
use crate::providers::{ProviderConfig, ProviderKind};
use crate::retry::RetryConfig;
use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Default number of documents processed concurrently per batch window.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 3;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Connection settings for one upstream provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    /// API key; providers without one are skipped.
    pub api_key: Option<String>,
    /// Base URL override.
    pub base_url: Option<String>,
    /// Chat model override.
    pub model: Option<String>,
    /// Embedding model override.
    pub embedding_model: Option<String>,
}

/// Runtime configuration for docpipe.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deepseek settings (`DEEPSEEK_*`).
    pub deepseek: ProviderSettings,
    /// Groq settings (`GROQ_*`).
    pub groq: ProviderSettings,
    /// Gemini settings (`GEMINI_*`).
    pub gemini: ProviderSettings,
    /// Per-request timeout override.
    pub provider_timeout: Option<Duration>,
    /// In-flight request cap override.
    pub max_concurrent_requests: Option<usize>,
    /// Retry budget override.
    pub retry_max_retries: Option<u32>,
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Overlap budget; a tenth of it is carried over as words.
    pub chunk_overlap: usize,
    /// Minimum chunk length in characters.
    pub min_chunk_length: usize,
    /// Documents per batch window.
    pub batch_concurrency: usize,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let settings = |kind: ProviderKind| {
            let prefix = kind.name().to_uppercase();
            ProviderSettings {
                api_key: optional(&format!("{prefix}_API_KEY")),
                base_url: optional(&format!("{prefix}_BASE_URL")),
                model: optional(&format!("{prefix}_MODEL")),
                embedding_model: optional(&format!("{prefix}_EMBEDDING_MODEL")),
            }
        };

        Ok(Self {
            deepseek: settings(ProviderKind::Deepseek),
            groq: settings(ProviderKind::Groq),
            gemini: settings(ProviderKind::Gemini),
            provider_timeout: parse_optional::<u64>(&optional, "PROVIDER_TIMEOUT_MS")?
                .map(Duration::from_millis),
            max_concurrent_requests: parse_optional(&optional, "PROVIDER_MAX_CONCURRENT_REQUESTS")?,
            retry_max_retries: parse_optional(&optional, "RETRY_MAX_RETRIES")?,
            chunk_size: parse_optional(&optional, "CHUNK_SIZE")?.unwrap_or(DEFAULT_CHUNK_SIZE),
            chunk_overlap: parse_optional(&optional, "CHUNK_OVERLAP")?
                .unwrap_or(DEFAULT_CHUNK_OVERLAP),
            min_chunk_length: parse_optional(&optional, "MIN_CHUNK_LENGTH")?
                .unwrap_or(DEFAULT_MIN_CHUNK_LENGTH),
            batch_concurrency: parse_optional(&optional, "BATCH_CONCURRENCY")?
                .unwrap_or(DEFAULT_BATCH_CONCURRENCY),
        })
    }

    /// Settings block for `kind`.
    pub fn provider_settings(&self, kind: ProviderKind) -> &ProviderSettings {
        match kind {
            ProviderKind::Deepseek => &self.deepseek,
            ProviderKind::Groq => &self.groq,
            ProviderKind::Gemini => &self.gemini,
        }
    }

    /// Provider configuration for `kind`, or `None` when no API key is set.
    pub fn provider_config(&self, kind: ProviderKind) -> Option<ProviderConfig> {
        let settings = self.provider_settings(kind);
        let api_key = settings.api_key.clone()?;
        let retry_config = self.retry_max_retries.map(|max_retries| RetryConfig {
            max_retries,
            ..RetryConfig::default()
        });
        Some(ProviderConfig {
            api_key,
            retry_config,
            max_concurrent_requests: self.max_concurrent_requests,
            timeout: self.provider_timeout,
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            embedding_model: settings.embedding_model.clone(),
            ..ProviderConfig::default()
        })
    }

    /// Every provider with an API key, in preference order.
    pub fn configured_providers(&self) -> Vec<(ProviderKind, ProviderConfig)> {
        ProviderKind::PREFERENCE
            .iter()
            .filter_map(|kind| self.provider_config(*kind).map(|config| (*kind, config)))
            .collect()
    }

    /// Chunker parameters.
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            min_chunk_length: self.min_chunk_length,
        }
    }
}

fn parse_optional<T: FromStr>(
    optional: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, if [`init_config`] has run.
pub fn get_config() -> Option<&'static Config> {
    CONFIG.get()
}

/// Load configuration from `.env` and the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        providers = ?config
            .configured_providers()
            .iter()
            .map(|(kind, _)| kind.name())
            .collect::<Vec<_>>(),
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        batch_concurrency = config.batch_concurrency,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
