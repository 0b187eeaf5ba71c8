/*!
 * Translation quality checks.
 *
 * A finished chunk can be scored after it is persisted:
 * - A length comparison that every provider can fall back to
 * - A judge reply from an LLM, parsed from its JSON verdict
 *
 * Results are advisory. They are reported on the job outcome and logged,
 * but never block persistence or change the job status.
 */

use log::debug;
use serde::Deserialize;

/// Largest tolerated relative length difference between source and translation
pub const DEFAULT_MAX_LENGTH_DEVIATION: f64 = 0.5;

/// Judge scores at or above this (out of 100) count as valid
pub const JUDGE_PASS_SCORE: f32 = 80.0;

/// Verdict on one translation
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationValidation {
    /// Whether the translation is acceptable
    pub is_valid: bool,
    /// Quality between 0.0 and 1.0
    pub score: f32,
    /// Problems found
    pub issues: Vec<String>,
    /// Improvements suggested by a judge
    pub suggestions: Vec<String>,
}

impl TranslationValidation {
    /// Create a passing verdict
    pub fn passed(score: f32) -> Self {
        Self {
            is_valid: true,
            score,
            issues: vec![],
            suggestions: vec![],
        }
    }

    /// Create a failing verdict
    pub fn failed(score: f32, issues: Vec<String>) -> Self {
        Self {
            is_valid: false,
            score,
            issues,
            suggestions: vec![],
        }
    }
}

/// Verdict for a persisted chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkValidation {
    pub chunk_id: u32,
    pub validation: TranslationValidation,
}

/// Compare lengths in characters.
///
/// Empty input on either side fails with a zero score. A translation whose
/// length differs from the source by more than half the source length fails
/// with a score of 0.5.
pub fn length_validation(source: &str, translated: &str) -> TranslationValidation {
    let source_len = source.trim().chars().count();
    let translated_len = translated.trim().chars().count();

    if source_len == 0 || translated_len == 0 {
        return TranslationValidation::failed(0.0, vec!["Source or translation is empty".to_string()]);
    }

    let deviation = (translated_len as f64 - source_len as f64).abs() / source_len as f64;
    debug!(
        "Length check: {} source / {} translated characters (deviation {:.2})",
        source_len, translated_len, deviation
    );
    if deviation > DEFAULT_MAX_LENGTH_DEVIATION {
        return TranslationValidation::failed(
            0.5,
            vec!["Translation length varies significantly from original".to_string()],
        );
    }
    TranslationValidation::passed(1.0)
}

/// System prompt for an LLM asked to judge a translation
pub fn judge_prompt(source_language: &str, target_language: &str) -> String {
    format!(
        "You review translations from {source} to {target}. Compare the translation with the \
         original and check accuracy, omissions, additions and fluency. Reply with a JSON object \
         only: {{\"isValid\": boolean, \"score\": number from 0 to 100, \"issues\": [string], \
         \"suggestions\": [string]}}.",
        source = source_language,
        target = target_language
    )
}

/// User message carrying the pair to judge
pub fn judge_message(source: &str, translated: &str) -> String {
    format!("Original:\n{}\n\nTranslation:\n{}", source, translated)
}

#[derive(Debug, Deserialize)]
struct JudgeReply {
    score: f32,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
}

/// Parse a judge's JSON verdict.
///
/// Validity follows the score alone; the judge's own `isValid` is ignored.
/// Returns `None` when the reply is not the expected JSON.
pub fn parse_judge_reply(reply: &str) -> Option<TranslationValidation> {
    let json = reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let parsed: JudgeReply = serde_json::from_str(json).ok()?;
    let score = parsed.score.clamp(0.0, 100.0);
    Some(TranslationValidation {
        is_valid: score >= JUDGE_PASS_SCORE,
        score: score / 100.0,
        issues: parsed.issues,
        suggestions: parsed.suggestions,
    })
}
