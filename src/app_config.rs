use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::translation::partitioner::PartitionTarget;
use crate::translation::retry::RetryPolicy;
use crate::translation::tokenizer::SizeMetric;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Source language code (ISO)
    pub source_language: String,

    /// Target language code (ISO)
    pub target_language: String,

    /// Translation config
    pub translation: TranslationConfig,

    /// Chunking config
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Storage config
    #[serde(default)]
    pub storage: StorageConfig,

    /// Layout of the written translation
    #[serde(default)]
    pub output_format: OutputFormat,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Translation provider type
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranslationProvider {
    // @provider: Ollama
    #[default]
    Ollama,
    // @provider: OpenAI
    OpenAI,
    // @provider: Anthropic
    Anthropic,
    // @provider: Google Gemini
    Gemini,
    // @provider: DeepL
    DeepL,
}

impl TranslationProvider {
    pub const ALL: [TranslationProvider; 5] = [
        Self::Ollama,
        Self::OpenAI,
        Self::Anthropic,
        Self::Gemini,
        Self::DeepL,
    ];

    // @returns: Capitalized provider name
    pub fn display_name(&self) -> &str {
        match self {
            Self::Ollama => "Ollama",
            Self::OpenAI => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Gemini => "Gemini",
            Self::DeepL => "DeepL",
        }
    }

    // @returns: Lowercase provider identifier
    pub fn to_lowercase_string(&self) -> String {
        match self {
            Self::Ollama => "ollama".to_string(),
            Self::OpenAI => "openai".to_string(),
            Self::Anthropic => "anthropic".to_string(),
            Self::Gemini => "gemini".to_string(),
            Self::DeepL => "deepl".to_string(),
        }
    }

    // @returns: Whether requests need an API key
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

// Implement Display trait for TranslationProvider
impl std::fmt::Display for TranslationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_lowercase_string())
    }
}

// Implement FromStr trait for TranslationProvider
impl std::str::FromStr for TranslationProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            "deepl" => Ok(Self::DeepL),
            _ => Err(anyhow!("Invalid provider type: {}", s)),
        }
    }
}

/// Provider configuration wrapper
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    // @field: Provider type identifier
    #[serde(rename = "type")]
    pub provider_type: String,

    // @field: Model name
    #[serde(default = "String::new")]
    pub model: String,

    // @field: API key
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: Service URL
    #[serde(default = "String::new")]
    pub endpoint: String,

    // @field: Timeout seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    // @param provider_type: Provider enum
    // @returns: Provider config with defaults
    pub fn new(provider_type: TranslationProvider) -> Self {
        Self {
            provider_type: provider_type.to_lowercase_string(),
            model: default_model(provider_type),
            api_key: String::new(),
            endpoint: default_endpoint(provider_type),
            timeout_secs: match provider_type {
                TranslationProvider::Ollama => default_ollama_timeout_secs(),
                _ => default_timeout_secs(),
            },
        }
    }

    // @returns: Request timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Translation service configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationConfig {
    /// Translation provider to use
    #[serde(default)]
    pub provider: TranslationProvider,

    /// Available translation providers
    #[serde(default)]
    pub available_providers: Vec<ProviderConfig>,

    /// Common translation settings
    #[serde(default)]
    pub common: TranslationCommonConfig,
}

/// Common translation settings applicable to all providers
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationCommonConfig {
    /// System prompt template for LLM providers
    /// Placeholders: {source_language}, {target_language}
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Minimum delay in milliseconds between consecutive provider calls of a job
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,

    /// Total calls per unit, including the first one
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Initial backoff in milliseconds, doubled on each retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Temperature parameter for text generation (0.0 to 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Translations shorter than this fraction of the source are rejected
    #[serde(default = "default_min_length_ratio")]
    pub min_length_ratio: f32,

    /// Jobs processed concurrently by `run_jobs`
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Ask the provider to judge every translated chunk
    #[serde(default)]
    pub validate_translations: bool,
}

impl Default for TranslationCommonConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
            temperature: default_temperature(),
            min_length_ratio: default_min_length_ratio(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            validate_translations: false,
        }
    }
}

impl TranslationCommonConfig {
    /// Retry policy derived from the retry settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_count,
            initial_delay: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Minimum interval between provider calls
    pub fn min_call_interval(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }
}

/// Document chunking settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum estimated size of a chunk
    #[serde(default = "default_max_unit_size")]
    pub max_unit_size: usize,

    /// Unit used for size estimates
    #[serde(default)]
    pub size_metric: SizeMetric,

    /// How oversized chunks are partitioned
    #[serde(default)]
    pub sub_chunk: PartitionTarget,

    /// Partition every chunk, not only oversized ones
    #[serde(default)]
    pub partition_all_chunks: bool,

    /// Characters of preceding source text passed as context
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,

    /// Re-translate chunks persisted with placeholder text when resuming
    #[serde(default)]
    pub retranslate_placeholders: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_unit_size: default_max_unit_size(),
            size_metric: SizeMetric::default(),
            sub_chunk: PartitionTarget::default(),
            partition_all_chunks: false,
            context_chars: default_context_chars(),
            retranslate_placeholders: false,
        }
    }
}

/// Persistent storage settings
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// SQLite database path; defaults to the platform data directory
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Database path to use
    pub fn resolved_database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => path.clone(),
            None => default_database_path(),
        }
    }
}

/// Layout of the written translation
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// The translated text only
    #[default]
    Text,
    /// Each source sentence followed by its translation
    Bilingual,
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_ollama_timeout_secs() -> u64 {
    120
}

fn default_rate_limit_delay_ms() -> u64 {
    500 // 500ms default delay between requests
}

fn default_retry_count() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    1000 // 1 second base backoff time, doubled on each retry
}

fn default_temperature() -> f32 {
    0.3
}

fn default_min_length_ratio() -> f32 {
    0.2
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_max_unit_size() -> usize {
    4000
}

fn default_context_chars() -> usize {
    200
}

fn default_endpoint(provider: TranslationProvider) -> String {
    match provider {
        TranslationProvider::Ollama => "http://localhost:11434",
        TranslationProvider::OpenAI => "https://api.openai.com/v1",
        TranslationProvider::Anthropic => "https://api.anthropic.com",
        TranslationProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        TranslationProvider::DeepL => "https://api.deepl.com/v2",
    }
    .to_string()
}

fn default_model(provider: TranslationProvider) -> String {
    match provider {
        TranslationProvider::Ollama => "llama3.2:3b",
        TranslationProvider::OpenAI => "gpt-4o-mini",
        TranslationProvider::Anthropic => "claude-3-5-haiku-latest",
        TranslationProvider::Gemini => "gemini-1.5-flash",
        // DeepL has no model selection; the name is only recorded on the job
        TranslationProvider::DeepL => "deepl",
    }
    .to_string()
}

fn default_system_prompt() -> String {
    "You are a professional translator. Translate the following text from {source_language} to {target_language}. Preserve paragraph breaks and timestamps such as (12:34) or [01:02:03] exactly. Reply with the translation only.".to_string()
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("longform")
        .join("longform.db")
}

impl Config {
    /// Load the configuration from `path`, writing defaults first if the file is missing
    pub fn load_or_create(path: &Path) -> Result<(Self, bool)> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to open config file: {}", path.display()))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok((config, false))
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok((config, true))
        }
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_json = serde_json::to_string_pretty(self)
            .context("Failed to serialize config to JSON")?;
        std::fs::write(path, config_json)
            .with_context(|| format!("Failed to write config to file: {}", path.display()))
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        // Validate languages
        let _source_name = crate::language_utils::get_language_name(&self.source_language)?;
        let _target_name = crate::language_utils::get_language_name(&self.target_language)?;

        if self.translation.provider.requires_api_key() && self.translation.get_api_key().is_empty() {
            return Err(anyhow!(
                "Translation API key is required for {} provider",
                self.translation.provider.display_name()
            ));
        }

        if self.chunking.max_unit_size == 0 {
            return Err(anyhow!("chunking.max_unit_size must be greater than zero"));
        }
        match self.chunking.sub_chunk {
            PartitionTarget::Count(0) | PartitionTarget::Size(0) => {
                return Err(anyhow!("chunking.sub_chunk must be greater than zero"));
            }
            _ => {}
        }
        if !(0.0..1.0).contains(&self.translation.common.min_length_ratio) {
            return Err(anyhow!("translation.common.min_length_ratio must be in [0, 1)"));
        }

        Ok(())
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: "en".to_string(),
            target_language: "fr".to_string(),
            translation: TranslationConfig::default(),
            chunking: ChunkingConfig::default(),
            storage: StorageConfig::default(),
            output_format: OutputFormat::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl TranslationConfig {
    /// Get the active provider configuration from the available_providers array
    pub fn get_active_provider_config(&self) -> Option<&ProviderConfig> {
        self.get_provider_config(&self.provider)
    }

    /// Get a specific provider configuration by type
    pub fn get_provider_config(&self, provider_type: &TranslationProvider) -> Option<&ProviderConfig> {
        let provider_str = provider_type.to_lowercase_string();
        self.available_providers
            .iter()
            .find(|p| p.provider_type == provider_str)
    }

    /// Active provider configuration, with defaults filled in for empty fields
    pub fn resolved_provider_config(&self) -> ProviderConfig {
        let mut resolved = ProviderConfig::new(self.provider);
        if let Some(configured) = self.get_active_provider_config() {
            if !configured.model.is_empty() {
                resolved.model = configured.model.clone();
            }
            if !configured.endpoint.is_empty() {
                resolved.endpoint = configured.endpoint.clone();
            }
            resolved.api_key = configured.api_key.clone();
            resolved.timeout_secs = configured.timeout_secs;
        }
        resolved
    }

    /// Set the model of the active provider, adding its entry if needed
    pub fn set_model(&mut self, model: impl Into<String>) {
        let provider_str = self.provider.to_lowercase_string();
        let model = model.into();
        match self
            .available_providers
            .iter_mut()
            .find(|p| p.provider_type == provider_str)
        {
            Some(provider_config) => provider_config.model = model,
            None => {
                let mut provider_config = ProviderConfig::new(self.provider);
                provider_config.model = model;
                self.available_providers.push(provider_config);
            }
        }
    }

    /// Get the model for the active provider
    pub fn get_model(&self) -> String {
        self.resolved_provider_config().model
    }

    /// Get the API key for the active provider
    pub fn get_api_key(&self) -> String {
        self.get_active_provider_config()
            .map(|p| p.api_key.clone())
            .unwrap_or_default()
    }

    /// Get the endpoint for the active provider
    pub fn get_endpoint(&self) -> String {
        self.resolved_provider_config().endpoint
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: TranslationProvider::default(),
            available_providers: TranslationProvider::ALL
                .iter()
                .map(|provider| ProviderConfig::new(*provider))
                .collect(),
            common: TranslationCommonConfig::default(),
        }
    }
}
