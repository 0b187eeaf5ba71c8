/*!
 * Long-document translation pipeline.
 *
 * This module turns a document into persisted, translated chunks. It is
 * split into several submodules:
 *
 * - `document`: Document, chunk and sub-chunk model
 * - `tokenizer`: Size estimation (tokens or characters)
 * - `splitter`: Paragraph/sentence aware chunking under a size limit
 * - `partitioner`: Sub-chunk partitioning of oversized chunks
 * - `retry`: Exponential backoff and call pacing around a provider
 * - `orchestrator`: Job driver with resume, placeholders and reassembly
 * - `validation`: Length and judge checks of finished translations
 * - `alignment`: Sentence pairs for bilingual output
 */

// Re-export main types for easier usage
pub use self::alignment::{create_sentence_pairs, render_bilingual, SentencePair};
pub use self::document::{Chunk, ChunkSeparator, Document, SubChunk};
pub use self::orchestrator::{JobOutcome, JobRequest, PipelineConfig, PipelineOrchestrator};
pub use self::partitioner::{PartitionTarget, SubChunkPartitioner};
pub use self::retry::{RetryController, RetryPolicy};
pub use self::splitter::ChunkSplitter;
pub use self::tokenizer::{SizeMetric, Tokenizer};
pub use self::validation::{ChunkValidation, TranslationValidation};

// Submodules
pub mod alignment;
pub mod document;
pub mod orchestrator;
pub mod partitioner;
pub mod retry;
pub mod splitter;
pub mod tokenizer;
pub mod validation;
