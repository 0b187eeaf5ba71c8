/*!
 * Provider implementations for different translation services.
 *
 * This module contains client implementations for the supported providers:
 * - OpenAI: chat completions API
 * - Anthropic: messages API
 * - Gemini: generateContent API
 * - DeepL: v2 translate API
 * - Ollama: local LLM server
 * - Mock: scripted provider for tests and dry runs
 *
 * Every adapter is built from injected settings and maps HTTP failures onto
 * `ProviderErrorKind` with the same rules, so the retry controller can treat
 * all providers alike.
 */

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;
use url::Url;

use crate::app_config::{Config, TranslationProvider};
use crate::errors::ProviderError;
use crate::translation::validation::{length_validation, TranslationValidation};

pub mod anthropic;
pub mod deepl;
pub mod gemini;
pub mod mock;
pub mod ollama;
pub mod openai;

pub use anthropic::Anthropic;
pub use deepl::DeepL;
pub use gemini::Gemini;
pub use mock::MockProvider;
pub use ollama::Ollama;
pub use openai::OpenAI;

/// Common trait for all translation providers
///
/// This trait defines the interface that all provider implementations must follow,
/// allowing them to be used interchangeably by the pipeline.
#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// Short provider identifier used in logs and job records
    fn name(&self) -> &str;

    /// Translate `text`.
    ///
    /// `context` is preceding source text that may help the provider; it
    /// must not be translated itself. Providers that cannot use it ignore it.
    async fn translate(&self, text: &str, context: Option<&str>) -> Result<String, ProviderError>;

    /// Judge a finished translation.
    ///
    /// The default compares lengths; adapters with a chat model override it.
    async fn validate(&self, source: &str, translated: &str) -> Result<TranslationValidation, ProviderError> {
        Ok(length_validation(source, translated))
    }

    /// Test the connection to the provider
    async fn test_connection(&self) -> Result<(), ProviderError>;
}

/// Settings shared by every adapter
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub model: String,
    pub api_key: String,
    pub endpoint: String,
    pub timeout: Duration,
    pub source_language: String,
    pub target_language: String,
    /// System prompt with language placeholders already filled in
    pub system_prompt: String,
    pub temperature: f32,
    /// Translations shorter than this fraction of the source are rejected
    pub min_length_ratio: f32,
}

impl ProviderSettings {
    /// Settings for the active provider of `config`
    pub fn from_config(config: &Config) -> Self {
        let provider = config.translation.resolved_provider_config();
        let common = &config.translation.common;
        Self {
            model: provider.model.clone(),
            api_key: provider.api_key.clone(),
            endpoint: provider.endpoint.clone(),
            timeout: provider.timeout(),
            source_language: config.source_language.clone(),
            target_language: config.target_language.clone(),
            system_prompt: render_prompt(
                &common.system_prompt,
                &config.source_language,
                &config.target_language,
            ),
            temperature: common.temperature,
            min_length_ratio: common.min_length_ratio,
        }
    }

    /// Apply the plausibility check to a provider answer
    pub fn check_translation(&self, source: &str, translated: String) -> Result<String, ProviderError> {
        check_plausible(source, translated, self.min_length_ratio)
    }
}

/// Provider selected at runtime
#[derive(Debug)]
pub enum ProviderClient {
    OpenAI(OpenAI),
    Anthropic(Anthropic),
    Gemini(Gemini),
    DeepL(DeepL),
    Ollama(Ollama),
    Mock(MockProvider),
}

impl ProviderClient {
    /// Build the adapter for the active provider of `config`
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let settings = ProviderSettings::from_config(config);
        let client = match config.translation.provider {
            TranslationProvider::OpenAI => Self::OpenAI(OpenAI::new(settings)?),
            TranslationProvider::Anthropic => Self::Anthropic(Anthropic::new(settings)?),
            TranslationProvider::Gemini => Self::Gemini(Gemini::new(settings)?),
            TranslationProvider::DeepL => Self::DeepL(DeepL::new(settings)?),
            TranslationProvider::Ollama => Self::Ollama(Ollama::new(settings)?),
        };
        Ok(client)
    }

    fn inner(&self) -> &dyn Provider {
        match self {
            Self::OpenAI(provider) => provider,
            Self::Anthropic(provider) => provider,
            Self::Gemini(provider) => provider,
            Self::DeepL(provider) => provider,
            Self::Ollama(provider) => provider,
            Self::Mock(provider) => provider,
        }
    }
}

#[async_trait]
impl Provider for ProviderClient {
    fn name(&self) -> &str {
        self.inner().name()
    }

    async fn translate(&self, text: &str, context: Option<&str>) -> Result<String, ProviderError> {
        self.inner().translate(text, context).await
    }

    async fn validate(&self, source: &str, translated: &str) -> Result<TranslationValidation, ProviderError> {
        self.inner().validate(source, translated).await
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        self.inner().test_connection().await
    }
}

/// Fill `{source_language}` and `{target_language}` with language names
pub fn render_prompt(template: &str, source_language: &str, target_language: &str) -> String {
    template
        .replace("{source_language}", &language_name(source_language))
        .replace("{target_language}", &language_name(target_language))
}

/// English name of a language code, or the code itself when unknown
pub(crate) fn language_name(code: &str) -> String {
    crate::language_utils::get_language_name(code).unwrap_or_else(|_| code.to_string())
}

/// User message for LLM providers, with optional preceding context
pub fn build_user_message(text: &str, context: Option<&str>) -> String {
    match context.filter(|c| !c.trim().is_empty()) {
        Some(context) => format!(
            "Preceding text, for context only. Do not translate it:\n{}\n\nText to translate:\n{}",
            context, text
        ),
        None => text.to_string(),
    }
}

/// Reject empty answers and answers implausibly short for the source
pub fn check_plausible(source: &str, translated: String, min_length_ratio: f32) -> Result<String, ProviderError> {
    let translated_len = translated.trim().chars().count();
    if translated_len == 0 {
        return Err(ProviderError::invalid_response("empty translation"));
    }

    let source_len = source.trim().chars().count();
    let minimum = (source_len as f32 * min_length_ratio).floor() as usize;
    if translated_len < minimum {
        return Err(ProviderError::invalid_response(format!(
            "translation too short: {} characters for {} source characters",
            translated_len, source_len
        )));
    }
    Ok(translated)
}

/// Reject an answer the vendor reports as cut off at its output token cap.
///
/// `truncated` is the vendor's finish reason for that case, compared
/// without regard to case.
pub fn check_finish_reason(
    provider: &str,
    finish_reason: Option<&str>,
    truncated: &str,
) -> Result<(), ProviderError> {
    match finish_reason {
        Some(reason) if reason.eq_ignore_ascii_case(truncated) => Err(ProviderError::invalid_response(
            format!("{}: output truncated at the token limit ({})", provider, reason),
        )),
        _ => Ok(()),
    }
}

/// Build an HTTP client with a bounded request timeout
pub(crate) fn http_client(timeout: Duration) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))
}

/// Join `path` onto a configured endpoint
pub(crate) fn endpoint_url(endpoint: &str, path: &str) -> Result<Url, ProviderError> {
    let base = format!("{}/", endpoint.trim_end_matches('/'));
    Url::parse(&base)
        .and_then(|url| url.join(path.trim_start_matches('/')))
        .map_err(|e| ProviderError::fatal(format!("Invalid endpoint '{}': {}", endpoint, e)))
}

/// Send a request and turn any non-success outcome into a `ProviderError`
pub(crate) async fn send(provider: &str, request: RequestBuilder) -> Result<Response, ProviderError> {
    let response = request.send().await.map_err(|e| classify_transport_error(provider, &e))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    debug!("{} API error ({}): {}", provider, status, truncate(&body, 500));
    Err(classify_status(provider, status, &body).with_retry_after(retry_after))
}

/// Decode a successful JSON body
pub(crate) async fn decode_json<T: DeserializeOwned>(provider: &str, response: Response) -> Result<T, ProviderError> {
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::transient(format!("{}: failed to read response body: {}", provider, e)))?;
    serde_json::from_str(&body).map_err(|e| {
        ProviderError::invalid_response(format!(
            "{}: undecodable response ({}): {}",
            provider,
            e,
            truncate(&body, 200)
        ))
    })
}

/// Map an HTTP status onto an error kind
pub fn classify_status(provider: &str, status: StatusCode, body: &str) -> ProviderError {
    let message = format!("{} API error ({}): {}", provider, status, truncate(body, 300));
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::rate_limited(message),
        StatusCode::REQUEST_TIMEOUT => ProviderError::transient(message),
        s if s.is_server_error() => ProviderError::transient(message),
        _ => ProviderError::fatal(message),
    }
}

fn classify_transport_error(provider: &str, error: &reqwest::Error) -> ProviderError {
    let message = format!("{}: request failed: {}", provider, error);
    if error.is_builder() {
        ProviderError::fatal(message)
    } else {
        // Timeouts, refused connections and dropped streams
        ProviderError::transient(message)
    }
}

/// `Retry-After` in delta-seconds form
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
