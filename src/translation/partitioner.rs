/*!
 * Sub-chunk partitioner.
 *
 * Breaks a chunk into sub-chunks that are translated by separate provider
 * calls. Cuts are placed after sentences, after paragraph breaks and before
 * positional markers; when those are not enough a piece is bisected at the
 * whitespace nearest its middle. The sub-chunks always concatenate back to
 * the exact chunk text.
 */

use serde::{Deserialize, Serialize};
use std::ops::Range;

use super::document::{find_marker, marker_spans, Chunk, SubChunk};
use super::splitter::{paragraph_ends, sentence_ends};
use super::tokenizer::Tokenizer;

/// How finely to partition a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "value")]
pub enum PartitionTarget {
    /// Produce this many sub-chunks when the text allows it
    Count(usize),
    /// Keep each sub-chunk at or below this estimated size when possible
    Size(usize),
}

impl Default for PartitionTarget {
    fn default() -> Self {
        PartitionTarget::Size(400)
    }
}

/// Splits chunks into sub-chunks
#[derive(Debug, Clone, Copy, Default)]
pub struct SubChunkPartitioner {
    tokenizer: Tokenizer,
}

impl SubChunkPartitioner {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self { tokenizer }
    }

    /// Partition `chunk` according to `target`.
    ///
    /// Zero counts and sizes are treated as 1.
    pub fn partition(&self, chunk: &Chunk, target: PartitionTarget) -> Vec<SubChunk> {
        let text = chunk.source_text.as_str();
        let pieces = boundary_pieces(text);

        let ranges = match target {
            PartitionTarget::Count(n) => self.partition_by_count(text, pieces, n.max(1)),
            PartitionTarget::Size(t) => self.partition_by_size(text, pieces, t.max(1)),
        };

        ranges
            .into_iter()
            .enumerate()
            .map(|(index, range)| {
                let piece = &text[range];
                let marker = match find_marker(piece) {
                    Some(marker) => Some(marker),
                    None if index == 0 => chunk.positional_marker.clone(),
                    None => None,
                };
                SubChunk::new(index as u32, piece, marker)
            })
            .collect()
    }

    fn partition_by_count(
        &self,
        text: &str,
        mut pieces: Vec<Range<usize>>,
        n: usize,
    ) -> Vec<Range<usize>> {
        if pieces.len() < n {
            while pieces.len() < n {
                let longest = pieces
                    .iter()
                    .enumerate()
                    .filter_map(|(index, range)| {
                        bisect_offset(&text[range.clone()]).map(|cut| (index, range.len(), cut))
                    })
                    .max_by_key(|(index, len, _)| (*len, std::cmp::Reverse(*index)));

                let Some((index, _, cut)) = longest else { break };
                let range = pieces[index].clone();
                let middle = range.start + cut;
                pieces.splice(index..=index, [range.start..middle, middle..range.end]);
            }
            return pieces;
        }

        let sizes: Vec<usize> = pieces
            .iter()
            .map(|range| self.tokenizer.estimate(&text[range.clone()]))
            .collect();
        let total: usize = sizes.iter().sum();
        let mut groups = Vec::with_capacity(n);
        let mut next = 0usize;
        let mut accumulated = 0usize;

        for group in 0..n {
            let remaining_groups = n - group;
            let first = next;
            // Close the group once the midpoint of the next piece would pass
            // this group's share of the total
            let boundary = total * (group + 1) * 2 / n;

            while next < pieces.len() {
                if group == n - 1 {
                    next = pieces.len();
                    break;
                }
                let pieces_left = pieces.len() - next;
                if next > first
                    && (pieces_left < remaining_groups || accumulated * 2 + sizes[next] > boundary)
                {
                    break;
                }
                accumulated += sizes[next];
                next += 1;
            }
            if next > first {
                groups.push(pieces[first].start..pieces[next - 1].end);
            }
        }
        groups
    }

    fn partition_by_size(
        &self,
        text: &str,
        pieces: Vec<Range<usize>>,
        target: usize,
    ) -> Vec<Range<usize>> {
        let mut fitted = Vec::new();
        for range in pieces {
            self.bisect_until_fits(text, range, target, &mut fitted);
        }

        let mut groups: Vec<Range<usize>> = Vec::new();
        for range in fitted {
            match groups.last_mut() {
                Some(last) if self.tokenizer.estimate(&text[last.start..range.end]) <= target => {
                    last.end = range.end;
                }
                _ => groups.push(range),
            }
        }
        groups
    }

    fn bisect_until_fits(
        &self,
        text: &str,
        range: Range<usize>,
        target: usize,
        out: &mut Vec<Range<usize>>,
    ) {
        let piece = &text[range.clone()];
        if self.tokenizer.estimate(piece) <= target {
            out.push(range);
            return;
        }
        match bisect_offset(piece) {
            Some(cut) => {
                let middle = range.start + cut;
                self.bisect_until_fits(text, range.start..middle, target, out);
                self.bisect_until_fits(text, middle..range.end, target, out);
            }
            None => out.push(range),
        }
    }
}

/// Cut `text` at sentence ends, paragraph breaks and before markers
fn boundary_pieces(text: &str) -> Vec<Range<usize>> {
    let markers = marker_spans(text);
    let mut cuts: Vec<usize> = sentence_ends(text);
    cuts.extend(paragraph_ends(text));
    cuts.extend(markers.iter().map(|(start, _)| *start));
    cuts.retain(|cut| *cut > 0 && *cut < text.len() && !inside_marker(*cut, &markers));
    cuts.sort_unstable();
    cuts.dedup();

    let mut pieces = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        pieces.push(start..cut);
        start = cut;
    }
    pieces.push(start..text.len());
    pieces
}

fn inside_marker(offset: usize, markers: &[(usize, usize)]) -> bool {
    markers.iter().any(|(start, end)| offset > *start && offset < *end)
}

/// Offset splitting `piece` in two, preferring the whitespace nearest the middle.
///
/// Returns `None` when no cut leaves both halves non-empty without
/// breaking a positional marker.
fn bisect_offset(piece: &str) -> Option<usize> {
    let markers = marker_spans(piece);
    let middle = piece.len() / 2;
    let allowed =
        |offset: &usize| *offset > 0 && *offset < piece.len() && !inside_marker(*offset, &markers);

    let after_whitespace = piece
        .char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .map(|(index, c)| index + c.len_utf8())
        .filter(allowed)
        .min_by_key(|offset| offset.abs_diff(middle));

    after_whitespace.or_else(|| {
        piece
            .char_indices()
            .map(|(index, _)| index)
            .filter(allowed)
            .min_by_key(|offset| offset.abs_diff(middle))
    })
}
