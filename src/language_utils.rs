use anyhow::{anyhow, Result};
use isolang::Language;

/// Language utilities for ISO language code handling
///
/// Provider adapters need language names for prompts (LLM providers) and
/// two-letter codes (DeepL); configuration may use either ISO 639-1 or
/// ISO 639-2 codes.

/// ISO 639-2/B codes that differ from their 639-2/T form
const BIBLIOGRAPHIC_CODES: &[(&str, &str)] = &[
    ("alb", "sqi"),
    ("arm", "hye"),
    ("baq", "eus"),
    ("bur", "mya"),
    ("chi", "zho"),
    ("cze", "ces"),
    ("dut", "nld"),
    ("fre", "fra"),
    ("geo", "kat"),
    ("ger", "deu"),
    ("gre", "ell"),
    ("ice", "isl"),
    ("mac", "mkd"),
    ("may", "msa"),
    ("per", "fas"),
    ("rum", "ron"),
    ("slo", "slk"),
    ("wel", "cym"),
];

/// Resolve a 2- or 3-letter code, ignoring case, whitespace and region suffixes
fn resolve(code: &str) -> Option<Language> {
    let normalized = code.trim().to_lowercase();
    let base = normalized.split(['-', '_']).next().unwrap_or_default();

    match base.len() {
        2 => Language::from_639_1(base),
        3 => {
            let terminological = BIBLIOGRAPHIC_CODES
                .iter()
                .find(|(bibliographic, _)| *bibliographic == base)
                .map(|(_, terminological)| *terminological)
                .unwrap_or(base);
            Language::from_639_3(terminological)
        }
        _ => None,
    }
}

/// Normalize a language code to ISO 639-2/T (3-letter) format
pub fn normalize_to_part2t(code: &str) -> Result<String> {
    resolve(code)
        .map(|lang| lang.to_639_3().to_string())
        .ok_or_else(|| anyhow!("Invalid language code: {}", code))
}

/// Normalize a language code to ISO 639-1 when one exists, else ISO 639-2/T
pub fn normalize_to_part1_or_part2t(code: &str) -> Result<String> {
    let lang = resolve(code).ok_or_else(|| anyhow!("Invalid language code: {}", code))?;
    Ok(lang
        .to_639_1()
        .map(str::to_string)
        .unwrap_or_else(|| lang.to_639_3().to_string()))
}

/// Check if two language codes represent the same language
pub fn language_codes_match(code1: &str, code2: &str) -> bool {
    match (resolve(code1), resolve(code2)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Get the English language name from a code
pub fn get_language_name(code: &str) -> Result<String> {
    resolve(code)
        .map(|lang| lang.to_name().to_string())
        .ok_or_else(|| anyhow!("Invalid language code: {}", code))
}

/// Upper-case two-letter code as expected by DeepL (`EN`, `KO`, `PT-BR`, ...)
pub fn to_deepl_code(code: &str) -> Result<String> {
    let trimmed = code.trim();
    let lang = resolve(trimmed).ok_or_else(|| anyhow!("Invalid language code: {}", code))?;
    let part1 = lang
        .to_639_1()
        .ok_or_else(|| anyhow!("DeepL requires a two-letter language code, got: {}", code))?;

    let region = trimmed
        .split(['-', '_'])
        .nth(1)
        .filter(|region| !region.is_empty());
    Ok(match region {
        Some(region) => format!("{}-{}", part1, region).to_uppercase(),
        None => part1.to_uppercase(),
    })
}
