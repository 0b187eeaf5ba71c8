/*!
 * Document, chunk and sub-chunk model.
 *
 * A `Document` is the immutable input. `Chunk`s and `SubChunk`s are derived
 * from it deterministically and live only in memory; only per-chunk
 * translations are persisted.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Timestamp-style anchors such as `(12:34)`, `[12:34]` or `[01:02:03]`
static MARKER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\(\[](?:\d{1,2}:)?\d{2}:\d{2}[\)\]]").expect("valid marker regex")
});

/// Source document to translate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier
    pub id: String,
    /// Full source text
    pub raw_text: String,
    /// Creation timestamp (RFC3339)
    pub created_at: String,
}

impl Document {
    /// Create a document with an explicit id
    pub fn new(id: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            raw_text: raw_text.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Create a document whose id is the SHA-256 of its text.
    ///
    /// The same text always maps to the same id, which lets a rerun find
    /// the unfinished job of an earlier run.
    pub fn from_text(raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let id = content_hash(&raw_text);
        Self::new(id, raw_text)
    }
}

/// Hex SHA-256 of a text
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Hex SHA-256 over the ids, separators and source texts of a chunk plan.
///
/// Chunk records are keyed by id only, so a job may only reuse them under a
/// plan with the same fingerprint.
pub fn plan_fingerprint(chunks: &[Chunk]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((chunks.len() as u64).to_le_bytes());
    for chunk in chunks {
        hasher.update(chunk.id.to_le_bytes());
        hasher.update(chunk.separator.as_str().as_bytes());
        hasher.update((chunk.source_text.len() as u64).to_le_bytes());
        hasher.update(chunk.source_text.as_bytes());
    }
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

/// How a chunk was joined to the chunk before it in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkSeparator {
    /// First chunk of the document
    None,
    /// Blank line between paragraphs
    Paragraph,
    /// Single space between sentences of one paragraph
    Space,
}

impl ChunkSeparator {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkSeparator::None => "",
            ChunkSeparator::Paragraph => "\n\n",
            ChunkSeparator::Space => " ",
        }
    }
}

/// A size-bounded, ordered slice of a document
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Sequence number; processing and reassembly order
    pub id: u32,
    /// Source text of the chunk
    pub source_text: String,
    /// Estimated size in the configured metric
    pub estimated_size: usize,
    /// First positional marker found in the chunk
    pub positional_marker: Option<String>,
    /// A single unit larger than the limit; must be sub-chunked
    pub oversized: bool,
    /// Separator to the previous chunk
    pub separator: ChunkSeparator,
    /// Sub-chunks, filled in by the partitioner
    pub sub_chunks: Vec<SubChunk>,
}

/// A piece of a chunk translated by a single provider call
#[derive(Debug, Clone, PartialEq)]
pub struct SubChunk {
    /// Index within the parent chunk
    pub id: u32,
    pub source_text: String,
    pub positional_marker: Option<String>,
    /// Set once translated (or replaced by a placeholder)
    pub translated_text: Option<String>,
}

impl SubChunk {
    pub fn new(id: u32, source_text: impl Into<String>, positional_marker: Option<String>) -> Self {
        Self {
            id,
            source_text: source_text.into(),
            positional_marker,
            translated_text: None,
        }
    }
}

/// First positional marker in `text`, if any
pub fn find_marker(text: &str) -> Option<String> {
    MARKER_PATTERN.find(text).map(|m| m.as_str().to_string())
}

/// Byte ranges of every positional marker in `text`
pub fn marker_spans(text: &str) -> Vec<(usize, usize)> {
    MARKER_PATTERN
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect()
}
