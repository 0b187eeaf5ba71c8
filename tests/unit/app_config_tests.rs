/*!
 * Tests for application configuration functionality
 */

use std::time::Duration;

use longform::app_config::{Config, LogLevel, TranslationProvider};
use longform::translation::{PartitionTarget, PipelineConfig, SizeMetric};

use crate::common;

/// Test that a missing config file is created with defaults
#[test]
fn test_loadOrCreate_withMissingFile_shouldWriteDefaults() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("conf.json");

    let (config, created) = Config::load_or_create(&path).unwrap();
    assert!(created);
    assert!(path.exists());
    assert_eq!(config.translation.provider, TranslationProvider::Ollama);
    assert_eq!(config.log_level, LogLevel::Info);

    // Second load reads the file it wrote
    let (reloaded, created) = Config::load_or_create(&path).unwrap();
    assert!(!created);
    assert_eq!(reloaded.target_language, config.target_language);
    assert_eq!(reloaded.chunking.max_unit_size, 4000);
}

/// Test that edited settings survive a save and reload
#[test]
fn test_save_withChunkingSettings_shouldRoundTrip() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("conf.json");

    let mut config = Config::default();
    config.target_language = "ko".to_string();
    config.chunking.sub_chunk = PartitionTarget::Count(3);
    config.chunking.size_metric = SizeMetric::Characters;
    config.chunking.retranslate_placeholders = true;
    config.storage.database_path = Some(dir.path().join("jobs.db"));
    config.save(&path).unwrap();

    let (reloaded, _) = Config::load_or_create(&path).unwrap();
    assert_eq!(reloaded.target_language, "ko");
    assert_eq!(reloaded.chunking.sub_chunk, PartitionTarget::Count(3));
    assert_eq!(reloaded.chunking.size_metric, SizeMetric::Characters);
    assert!(reloaded.chunking.retranslate_placeholders);
    assert_eq!(
        reloaded.storage.resolved_database_path(),
        dir.path().join("jobs.db")
    );

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains(r#""mode": "count""#));
}

/// Test that malformed JSON is reported instead of silently replaced
#[test]
fn test_loadOrCreate_withInvalidJson_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(dir.path(), "conf.json", "{ not json").unwrap();

    let error = Config::load_or_create(&path).unwrap_err();
    assert!(format!("{:#}", error).contains("Failed to parse config file"));
}

/// Test configuration validation
#[test]
fn test_validate_withVariousConfigs_shouldValidateCorrectly() {
    let mut config = Config::default();
    assert!(config.validate().is_ok());

    config.source_language = "xyz".to_string();
    assert!(config.validate().is_err());
    config.source_language = "en".to_string();

    config.chunking.max_unit_size = 0;
    assert!(config.validate().is_err());
    config.chunking.max_unit_size = 4000;

    config.chunking.sub_chunk = PartitionTarget::Size(0);
    assert!(config.validate().is_err());
    config.chunking.sub_chunk = PartitionTarget::Count(2);
    assert!(config.validate().is_ok());

    config.translation.common.min_length_ratio = 1.5;
    assert!(config.validate().is_err());
    config.translation.common.min_length_ratio = 0.1;

    // OpenAI needs a key, Ollama does not
    config.translation.provider = TranslationProvider::OpenAI;
    assert!(config.validate().is_err());
    let dir = common::create_temp_dir().unwrap();
    let keyed = common::test_config(TranslationProvider::OpenAI, "http://localhost:1", &dir.path().join("db"));
    assert!(keyed.validate().is_ok());
}

/// Test that the model override lands on the active provider only
#[test]
fn test_setModel_withSeveralProviders_shouldOnlyChangeActiveOne() {
    let mut config = Config::default();
    config.translation.provider = TranslationProvider::Anthropic;
    config.translation.set_model("claude-3-opus-latest");

    assert_eq!(config.translation.get_model(), "claude-3-opus-latest");
    let openai = config
        .translation
        .get_provider_config(&TranslationProvider::OpenAI)
        .unwrap();
    assert_eq!(openai.model, "gpt-4o-mini");
}

/// Test that an empty endpoint falls back to the provider default
#[test]
fn test_getEndpoint_withEmptyEndpoint_shouldUseDefault() {
    let mut config = Config::default();
    config.translation.provider = TranslationProvider::DeepL;
    for provider in config.translation.available_providers.iter_mut() {
        provider.endpoint.clear();
    }

    assert_eq!(config.translation.get_endpoint(), "https://api.deepl.com/v2");
}

/// Test the pipeline settings derived from the file configuration
#[test]
fn test_pipelineConfig_fromConfig_shouldCarrySettings() {
    let mut config = Config::default();
    config.chunking.max_unit_size = 1200;
    config.chunking.context_chars = 0;
    config.translation.common.retry_count = 3;
    config.translation.common.retry_backoff_ms = 250;
    config.translation.common.rate_limit_delay_ms = 100;
    config.translation.common.validate_translations = true;

    let pipeline = PipelineConfig::from_config(&config);
    assert_eq!(pipeline.max_unit_size, 1200);
    assert_eq!(pipeline.context_chars, 0);
    assert_eq!(pipeline.retry_policy.max_attempts, 3);
    assert_eq!(pipeline.retry_policy.initial_delay, Duration::from_millis(250));
    assert_eq!(pipeline.min_call_interval, Duration::from_millis(100));
    assert!(pipeline.validate_translations);
}
