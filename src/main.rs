use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docpipe::auth::{StaticUserDirectory, UserContext};
use docpipe::config::{self, Config};
use docpipe::logging;
use docpipe::processing::{
    BatchOptions, Chunker, DocumentInput, DocumentProcessor, InMemoryDocumentStore,
    ProcessingProgress, ProgressCallback,
};
use docpipe::providers::{AiProvider, ChatMessage, OfflineProvider, ProviderFactory, ProviderKind};
use futures_util::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

#[derive(Debug, Parser)]
#[command(name = "docpipe", version, about = "Chat, embed and ingest documents through AI providers")]
struct Cli {
    /// Provider to use (`deepseek`, `groq`, `gemini` or `offline`); defaults to the first
    /// configured provider with capacity, or `offline` when none has an API key.
    #[arg(long, global = true)]
    provider: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stream a chat reply to stdout.
    Chat {
        /// User prompt.
        prompt: String,
        /// Optional system instruction.
        #[arg(long)]
        system: Option<String>,
    },
    /// Print the embedding of a text as JSON.
    Embed {
        /// Text to embed.
        text: String,
    },
    /// Print the chunks produced for a file.
    Chunk {
        /// File to split.
        path: PathBuf,
    },
    /// Ingest files into an in-memory store and optionally search them.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Owner of the ingested documents.
        #[arg(long, default_value = "local")]
        user: String,
        /// Owner's department.
        #[arg(long)]
        department: Option<String>,
        /// Store documents as private.
        #[arg(long)]
        private: bool,
        /// Documents per batch window.
        #[arg(long)]
        concurrency: Option<usize>,
        /// Query to run against the ingested documents.
        #[arg(long)]
        query: Option<String>,
        /// Minimum similarity for query hits.
        #[arg(long, default_value_t = 0.5)]
        threshold: f32,
        /// Maximum number of query hits.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();
    let config = config::init_config().context("Failed to load configuration")?;
    let factory = ProviderFactory::new();
    let provider = resolve_provider(&factory, config, cli.provider.as_deref())?;
    tracing::debug!(provider = provider.name(), "Resolved provider");

    match cli.command {
        Command::Chat { prompt, system } => chat(provider.as_ref(), prompt, system).await,
        Command::Embed { text } => {
            let response = provider.generate_embedding(&text).await?;
            let output = serde_json::json!({
                "provider": provider.name(),
                "dimension": response.embedding.len(),
                "usage": { "promptTokens": response.usage.prompt_tokens, "totalTokens": response.usage.total_tokens },
                "embedding": response.embedding,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Command::Chunk { path } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let chunker = Chunker::new(config.chunker_config())?;
            for (index, chunk) in chunker.split_into_chunks(&content)?.iter().enumerate() {
                println!("--- chunk {index} ({} chars)", chunk.chars().count());
                println!("{chunk}");
            }
            Ok(())
        }
        Command::Ingest {
            paths,
            user,
            department,
            private,
            concurrency,
            query,
            threshold,
            limit,
        } => {
            let mut context = UserContext::active(user.clone());
            context.department = department;
            let documents = collect_documents(&paths, private)?;
            if documents.is_empty() {
                bail!("No readable text files found");
            }

            let processor = DocumentProcessor::new(
                provider,
                Arc::new(InMemoryDocumentStore::new()),
                Arc::new(StaticUserDirectory::new(context)),
                Chunker::new(config.chunker_config())?,
            );
            let on_progress: ProgressCallback = Arc::new(|progress: &ProcessingProgress| {
                eprintln!(
                    "[{:?}] documents {}/{} chunks {}/{}",
                    progress.status,
                    progress.processed_documents,
                    progress.total_documents,
                    progress.processed_chunks,
                    progress.total_chunks
                );
            });
            let outcome = processor
                .process_batch(
                    &documents,
                    &user,
                    None,
                    BatchOptions {
                        concurrency: concurrency.unwrap_or(config.batch_concurrency),
                        on_progress: Some(on_progress),
                        ..BatchOptions::default()
                    },
                )
                .await?;

            for (document, result) in documents.iter().zip(&outcome.results) {
                match result {
                    Ok(processed) => {
                        println!("ok    {} ({} chunks)", document.title, processed.chunks.len())
                    }
                    Err(error) => println!("error {}: {error}", document.title),
                }
            }

            if let Some(query) = query {
                for hit in processor.search(&query, &user, threshold, limit).await? {
                    println!("{:.3}  {}", hit.similarity, hit.content);
                }
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&processor.metrics_snapshot())?
            );
            Ok(())
        }
    }
}

fn resolve_provider(
    factory: &ProviderFactory,
    config: &Config,
    requested: Option<&str>,
) -> Result<Arc<dyn AiProvider>> {
    match requested {
        Some("offline") => Ok(Arc::new(OfflineProvider::default())),
        Some(name) => {
            let kind: ProviderKind = name.parse()?;
            let provider_config = config
                .provider_config(kind)
                .with_context(|| format!("No API key configured for {kind}"))?;
            Ok(factory.provider(kind, &provider_config)?)
        }
        None => {
            let candidates = config.configured_providers();
            if candidates.is_empty() {
                tracing::info!("No provider API keys configured; using offline provider");
                return Ok(Arc::new(OfflineProvider::default()));
            }
            Ok(factory.get_available_provider_from(candidates)?)
        }
    }
}

async fn chat(provider: &dyn AiProvider, prompt: String, system: Option<String>) -> Result<()> {
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));

    let mut stream = provider.chat_stream(&messages).await?;
    let mut stdout = std::io::stdout();
    while let Some(delta) = stream.next().await {
        write!(stdout, "{}", delta?)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

fn collect_documents(paths: &[PathBuf], private: bool) -> Result<Vec<DocumentInput>> {
    let mut documents = Vec::new();
    for root in paths {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            match std::fs::read_to_string(entry.path()) {
                Ok(content) => documents.push(document_for(entry.path(), content, private)),
                Err(error) => {
                    tracing::warn!(path = %entry.path().display(), error = %error, "Skipping unreadable file");
                }
            }
        }
    }
    Ok(documents)
}

fn document_for(path: &Path, content: String, private: bool) -> DocumentInput {
    let title = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mut document = DocumentInput::new(title, content)
        .with_metadata("source_uri", path.display().to_string());
    document.is_private = private;
    document
}
