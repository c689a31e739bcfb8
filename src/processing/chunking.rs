//! Sentence-aligned chunking with word-level overlap.
//!
//! Text is whitespace-normalized, split after `.`, `!` or `?` followed by whitespace, and the
//! sentences are packed greedily into chunks of at most `chunk_size` characters. Each new chunk
//! is seeded with the trailing `chunk_overlap / 10` words of the previous one. The overlap is a
//! word count, not a character count, so chunk boundaries stay stable for already-stored
//! documents.
//!
//! Lengths are measured in characters. A chunk only exceeds `chunk_size` when it holds a
//! sentence that cannot fit on its own, or when a short tail had to be merged into it to honor
//! `min_chunk_length`.

use crate::processing::types::{Chunk, ChunkingError, Metadata};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Default maximum chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default overlap budget; divided by ten to get the overlap word count.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
/// Default minimum chunk length in characters.
pub const DEFAULT_MIN_CHUNK_LENGTH: usize = 50;

/// Chunk sizing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Upper bound on chunk length.
    pub chunk_size: usize,
    /// Overlap budget; `chunk_overlap / 10` words are carried over.
    pub chunk_overlap: usize,
    /// Chunks shorter than this are merged with their neighbours.
    pub min_chunk_length: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            min_chunk_length: DEFAULT_MIN_CHUNK_LENGTH,
        }
    }
}

/// Deterministic text chunker.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Build a chunker, rejecting a zero `chunk_size`.
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkingError> {
        if config.chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self { config })
    }

    /// Active configuration.
    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    /// Number of words carried from one chunk into the next.
    pub fn overlap_words(&self) -> usize {
        self.config.chunk_overlap / 10
    }

    /// Split `content` and attach per-chunk metadata.
    ///
    /// Every chunk receives a copy of `metadata` plus `user_id`, `chunk_index`, `chunk_count`
    /// and a SHA-256 `chunk_hash` of its content.
    pub fn generate_chunks(
        &self,
        content: &str,
        user_id: &str,
        metadata: &Metadata,
    ) -> Result<Vec<Chunk>, ChunkingError> {
        let pieces = self.split_into_chunks(content)?;
        let count = pieces.len();
        let chunks = pieces
            .into_iter()
            .enumerate()
            .map(|(index, content)| {
                let mut chunk_metadata = metadata.clone();
                chunk_metadata.insert("user_id".into(), Value::String(user_id.to_string()));
                chunk_metadata.insert("chunk_index".into(), Value::from(index));
                chunk_metadata.insert("chunk_count".into(), Value::from(count));
                chunk_metadata.insert(
                    "chunk_hash".into(),
                    Value::String(compute_chunk_hash(&content)),
                );
                Chunk {
                    index,
                    content,
                    metadata: chunk_metadata,
                }
            })
            .collect();
        tracing::debug!(user_id, chunks = count, "Generated chunks");
        Ok(chunks)
    }

    /// Split `content` into chunk texts.
    pub fn split_into_chunks(&self, content: &str) -> Result<Vec<String>, ChunkingError> {
        let normalized = normalize_whitespace(content);
        if normalized.is_empty() {
            return Err(ChunkingError::EmptyDocument);
        }

        let ChunkerConfig {
            chunk_size,
            min_chunk_length,
            ..
        } = self.config;
        let overlap_words = self.overlap_words();

        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        // Byte offset in `current` where text not carried over from the previous chunk begins.
        let mut fresh_from = 0;

        for sentence in split_sentences(&normalized) {
            if current.is_empty() {
                current.push_str(sentence);
                fresh_from = 0;
                continue;
            }

            let current_len = char_len(&current);
            let sentence_len = char_len(sentence);
            if current_len + 1 + sentence_len <= chunk_size || current_len < min_chunk_length {
                current.push(' ');
                current.push_str(sentence);
                continue;
            }

            let seed = overlap_seed(
                &current,
                overlap_words,
                chunk_size.saturating_sub(sentence_len + 1),
            );
            chunks.push(std::mem::take(&mut current));
            if seed.is_empty() {
                fresh_from = 0;
            } else {
                current.push_str(&seed);
                current.push(' ');
                fresh_from = current.len();
            }
            current.push_str(sentence);
        }

        if !current.is_empty() {
            match chunks.last_mut() {
                Some(last) if char_len(&current) < min_chunk_length => {
                    last.push(' ');
                    last.push_str(&current[fresh_from..]);
                }
                _ => chunks.push(current),
            }
        }

        Ok(chunks)
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            config: ChunkerConfig::default(),
        }
    }
}

/// Compute a deterministic SHA-256 hash for the chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split normalized text after sentence terminators that are followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(next_idx, next)) = chars.peek()
            && next.is_whitespace()
        {
            sentences.push(&text[start..idx + ch.len_utf8()]);
            start = next_idx + next.len_utf8();
            chars.next();
        }
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

/// Trailing `words` words of `text`, dropping leading words until the seed fits `budget` chars.
fn overlap_seed(text: &str, words: usize, budget: usize) -> String {
    if words == 0 {
        return String::new();
    }
    let all: Vec<&str> = text.split(' ').collect();
    let mut tail = &all[all.len().saturating_sub(words)..];
    loop {
        let seed = tail.join(" ");
        if tail.is_empty() || char_len(&seed) <= budget {
            return seed;
        }
        tail = &tail[1..];
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
