#![deny(missing_docs)]

//! Core library for docpipe: AI provider clients and the document ingestion pipeline.

/// Caller access verification against the user directory.
pub mod auth;
/// Environment-driven configuration management.
pub mod config;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics counters.
pub mod metrics;
/// Document processing pipeline: chunking, embedding, transactional persistence, batches.
pub mod processing;
/// Chat/embedding provider clients and the provider registry.
pub mod providers;
/// Per-provider token-bucket rate limiting.
pub mod rate_limit;
/// Exponential backoff retry executor.
pub mod retry;
