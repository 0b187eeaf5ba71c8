/*!
 * Sentence alignment between a source text and its translation.
 *
 * Both sides are split into sentences, line by line, and paired by
 * position. Positional markers are lifted off the sentence text and kept on
 * the pair. Alignment is positional only: a translation that merges or
 * splits sentences shifts the pairing, but no text is ever dropped.
 */

use super::document::{find_marker, marker_spans};
use super::splitter::sentence_ends;

/// A source sentence and the translated sentence at the same position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentencePair {
    /// Position in the document, from 0
    pub index: usize,
    pub source: String,
    /// Empty when the translation has fewer sentences than the source
    pub translation: String,
    /// Marker found in the source sentence, else in the translated one
    pub marker: Option<String>,
}

/// A sentence with its positional marker removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub text: String,
    pub marker: Option<String>,
}

/// Split `text` into sentences with markers stripped and whitespace collapsed
pub fn split_sentences(text: &str) -> Vec<Sentence> {
    let mut sentences = Vec::new();
    for line in text.lines() {
        let mut start = 0;
        let mut cuts = sentence_ends(line);
        cuts.push(line.len());
        for end in cuts {
            let piece = &line[start..end];
            start = end;

            let cleaned = strip_markers(piece);
            if !cleaned.is_empty() {
                sentences.push(Sentence {
                    text: cleaned,
                    marker: find_marker(piece),
                });
            }
        }
    }
    sentences
}

fn strip_markers(text: &str) -> String {
    let mut kept = String::with_capacity(text.len());
    let mut last = 0;
    for (start, end) in marker_spans(text) {
        kept.push_str(&text[last..start]);
        kept.push(' ');
        last = end;
    }
    kept.push_str(&text[last..]);
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pair the sentences of `source` and `translation` by position.
///
/// Surplus translated sentences are joined onto the last pair, so the
/// concatenated translations always hold every translated sentence.
pub fn create_sentence_pairs(source: &str, translation: &str) -> Vec<SentencePair> {
    let sources = split_sentences(source);
    let mut translations = split_sentences(translation);

    if !sources.is_empty() && translations.len() > sources.len() {
        let surplus: Vec<String> = translations
            .drain(sources.len() - 1..)
            .map(|sentence| sentence.text)
            .collect();
        translations.push(Sentence {
            text: surplus.join(" "),
            marker: None,
        });
    }

    let count = sources.len().max(translations.len());
    let mut sources = sources.into_iter();
    let mut translations = translations.into_iter();
    (0..count)
        .map(|index| {
            let source = sources.next();
            let translated = translations.next();
            let marker = source
                .as_ref()
                .and_then(|s| s.marker.clone())
                .or_else(|| translated.as_ref().and_then(|t| t.marker.clone()));
            SentencePair {
                index,
                source: source.map(|s| s.text).unwrap_or_default(),
                translation: translated.map(|t| t.text).unwrap_or_default(),
                marker,
            }
        })
        .collect()
}

/// Render pairs as blocks of `[marker ]source` over `translation`
pub fn render_bilingual(pairs: &[SentencePair]) -> String {
    pairs
        .iter()
        .map(|pair| match &pair.marker {
            Some(marker) => format!("{} {}\n{}", marker, pair.source, pair.translation),
            None => format!("{}\n{}", pair.source, pair.translation),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
