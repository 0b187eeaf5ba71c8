/*!
 * Chunk splitter.
 *
 * Splits a document into ordered chunks whose estimated size stays under a
 * limit. Paragraphs are the semantic unit; a document that is a single
 * oversized paragraph falls back to sentences. A unit that is larger than
 * the limit on its own becomes a chunk of its own, flagged as oversized so
 * that the partitioner breaks it up before translation.
 */

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use super::document::{find_marker, Chunk, ChunkSeparator};
use super::tokenizer::Tokenizer;
use crate::errors::SplitError;

/// One or more blank lines
static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t\r]*\n\s*").expect("valid paragraph regex"));

/// Sentence terminator, optional closing quote or bracket, then whitespace.
/// CJK full stops do not need trailing whitespace.
static SENTENCE_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:[.!?…]+["'”’)\]]*\s+|[。！？]+["'”’」』)\]]*\s*)"#)
        .expect("valid sentence regex")
});

/// Byte offsets just past each sentence terminator and its whitespace
pub(crate) fn sentence_ends(text: &str) -> Vec<usize> {
    SENTENCE_END
        .find_iter(text)
        .map(|m| m.end())
        .filter(|end| *end < text.len())
        .collect()
}

/// Byte offsets just past each paragraph break
pub(crate) fn paragraph_ends(text: &str) -> Vec<usize> {
    PARAGRAPH_BREAK
        .find_iter(text)
        .map(|m| m.end())
        .filter(|end| *end < text.len())
        .collect()
}

#[derive(Debug)]
struct Unit<'a> {
    text: &'a str,
    size: usize,
}

/// Splits documents into size-bounded chunks
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkSplitter {
    tokenizer: Tokenizer,
}

impl ChunkSplitter {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self { tokenizer }
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Split `text` into chunks of at most `max_unit_size`.
    ///
    /// The only chunks allowed to exceed the limit are single units flagged
    /// with `oversized`. Output is deterministic for a given input.
    pub fn split(&self, text: &str, max_unit_size: usize) -> Result<Vec<Chunk>, SplitError> {
        if max_unit_size == 0 {
            return Err(SplitError::InvalidMaxSize);
        }

        let paragraphs = self.units(PARAGRAPH_BREAK.split(text));
        let single_oversized =
            matches!(paragraphs.as_slice(), [only] if only.size > max_unit_size);
        let (units, separator) = if single_oversized {
            let only = &paragraphs[0];
            debug!(
                "Single paragraph of size {} exceeds {}, splitting by sentence",
                only.size, max_unit_size
            );
            (self.units(split_sentences(only.text)), ChunkSeparator::Space)
        } else {
            (paragraphs, ChunkSeparator::Paragraph)
        };

        let mut chunks = Vec::new();
        let mut buffer: Vec<&str> = Vec::new();

        for unit in units {
            if unit.size > max_unit_size {
                self.flush(&mut chunks, &mut buffer, separator, false);
                buffer.push(unit.text);
                self.flush(&mut chunks, &mut buffer, separator, true);
                continue;
            }

            // Measure the joined text so the separator counts toward the limit
            if !buffer.is_empty() && self.joined_size(&buffer, unit.text, separator) > max_unit_size {
                self.flush(&mut chunks, &mut buffer, separator, false);
            }
            buffer.push(unit.text);
        }
        self.flush(&mut chunks, &mut buffer, separator, false);

        debug!(
            "Split {} characters into {} chunks (max size {})",
            text.len(),
            chunks.len(),
            max_unit_size
        );
        Ok(chunks)
    }

    fn units<'a>(&self, pieces: impl Iterator<Item = &'a str>) -> Vec<Unit<'a>> {
        pieces
            .map(str::trim)
            .filter(|piece| !piece.is_empty())
            .map(|piece| Unit {
                text: piece,
                size: self.tokenizer.estimate(piece),
            })
            .collect()
    }

    fn joined_size(&self, buffer: &[&str], next: &str, separator: ChunkSeparator) -> usize {
        let mut candidate = buffer.join(separator.as_str());
        candidate.push_str(separator.as_str());
        candidate.push_str(next);
        self.tokenizer.estimate(&candidate)
    }

    fn flush(
        &self,
        chunks: &mut Vec<Chunk>,
        buffer: &mut Vec<&str>,
        separator: ChunkSeparator,
        oversized: bool,
    ) {
        if buffer.is_empty() {
            return;
        }

        let source_text = buffer.join(separator.as_str());
        buffer.clear();

        let id = chunks.len() as u32;
        chunks.push(Chunk {
            id,
            estimated_size: self.tokenizer.estimate(&source_text),
            positional_marker: find_marker(&source_text),
            oversized,
            separator: if id == 0 { ChunkSeparator::None } else { separator },
            sub_chunks: Vec::new(),
            source_text,
        });
    }
}

fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    let mut start = 0;
    let mut cuts = sentence_ends(text);
    cuts.push(text.len());
    cuts.into_iter().map(move |end| {
        let sentence = &text[start..end];
        start = end;
        sentence
    })
}
