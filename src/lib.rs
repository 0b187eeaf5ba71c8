/*!
 * # longform - chunked translation of long documents with AI providers
 *
 * A Rust library for translating documents that are far larger than a
 * model's context window, without losing work when a run is interrupted.
 *
 * ## Features
 *
 * - Paragraph and sentence aware chunking under a token (or character) budget
 * - Sub-chunk partitioning of oversized paragraphs, keeping positional markers
 * - Translation through various AI providers:
 *   - Ollama (local LLM)
 *   - OpenAI API
 *   - Anthropic API
 *   - Google Gemini API
 *   - DeepL API
 * - Exponential backoff with `Retry-After` support and call pacing
 * - Per-chunk persistence in SQLite, so interrupted jobs resume where they stopped
 * - Visible placeholders instead of silent gaps when a unit cannot be translated
 * - ISO 639-1 and ISO 639-2 language code support
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `translation`: The pipeline:
 *   - `translation::splitter`: Document to chunks
 *   - `translation::partitioner`: Oversized chunk to sub-chunks
 *   - `translation::retry`: Backoff around provider calls
 *   - `translation::orchestrator`: Job driver, resume and reassembly
 * - `store`: Storage traits and the in-memory store
 * - `database`: SQLite-backed store
 * - `providers`: Client implementations for the supported providers
 * - `app_controller`: Main application controller
 * - `file_utils`: File system operations
 * - `language_utils`: ISO language code utilities
 * - `errors`: Custom error types for the application
 */

// Global lints configuration
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod database;
pub mod errors;
pub mod file_utils;
pub mod language_utils;
pub mod providers;
pub mod store;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::Config;
pub use errors::{AppError, PipelineError, ProviderError, ProviderErrorKind, RetryError, StoreError};
pub use language_utils::{get_language_name, language_codes_match, normalize_to_part2t};
pub use providers::{Provider, ProviderClient};
pub use store::{ChunkStore, DocumentSource, JobStatus};
pub use translation::{Document, PipelineConfig, PipelineOrchestrator};
