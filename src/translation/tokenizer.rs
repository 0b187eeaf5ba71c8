/*!
 * Size estimation for text spans.
 */

use serde::{Deserialize, Serialize};

/// Unit used to measure chunk sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeMetric {
    /// Approximate model tokens
    #[default]
    Tokens,
    /// Unicode characters
    Characters,
}

/// Estimates the size of text in a given metric
#[derive(Debug, Clone, Copy, Default)]
pub struct Tokenizer {
    metric: SizeMetric,
}

impl Tokenizer {
    pub fn new(metric: SizeMetric) -> Self {
        Self { metric }
    }

    pub fn metric(&self) -> SizeMetric {
        self.metric
    }

    /// Estimated size of `text`
    pub fn estimate(&self, text: &str) -> usize {
        match self.metric {
            SizeMetric::Tokens => estimate_tokens(text),
            SizeMetric::Characters => text.chars().count(),
        }
    }
}

/// Rough token estimate.
///
/// Whitespace separated words count 1.3 tokens each; ideographic and Hangul
/// characters, which are not separated by spaces, count one token each.
pub fn estimate_tokens(text: &str) -> usize {
    let mut words = 0usize;
    let mut wide_chars = 0usize;

    for word in text.split_whitespace() {
        let wide = word.chars().filter(|c| is_wide_script(*c)).count();
        wide_chars += wide;
        if wide < word.chars().count() {
            words += 1;
        }
    }

    (words * 13).div_ceil(10) + wide_chars
}

fn is_wide_script(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // Hiragana, Katakana
        | 0x3400..=0x4DBF    // CJK extension A
        | 0x4E00..=0x9FFF    // CJK unified ideographs
        | 0xAC00..=0xD7AF    // Hangul syllables
        | 0xF900..=0xFAFF)   // CJK compatibility ideographs
}
