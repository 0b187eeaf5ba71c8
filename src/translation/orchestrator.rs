/*!
 * Pipeline orchestrator.
 *
 * Drives one translation job from document to persisted chunk records:
 * 1. Split the document into chunks and check the plan against the one the
 *    job recorded, so that records are never reused for different text
 * 2. Skip chunks that already have a record (resume)
 * 3. Partition oversized chunks and translate each unit through the retry
 *    controller, carrying the tail of the previous unit as context
 * 4. Upsert each finished chunk before moving to the next one
 * 5. Reconcile the job status from the set of persisted chunk ids
 *
 * Units that exhaust their retries or come back unusable are replaced by a
 * visible placeholder so the rest of the document still gets translated.
 * When enabled, every translated chunk is judged by the provider after it
 * is persisted; verdicts are reported on the outcome and never fail a job.
 */

use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::alignment::{create_sentence_pairs, SentencePair};
use super::document::{plan_fingerprint, Chunk, Document, SubChunk};
use super::partitioner::{PartitionTarget, SubChunkPartitioner};
use super::retry::{RetryController, RetryPolicy};
use super::splitter::ChunkSplitter;
use super::tokenizer::{SizeMetric, Tokenizer};
use super::validation::ChunkValidation;
use crate::app_config::Config;
use crate::errors::{PipelineError, StoreError};
use crate::providers::Provider;
use crate::store::models::short_id;
use crate::store::{ChunkRecord, ChunkStore, JobStatus};

/// Configuration for the translation pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum estimated size of a chunk
    pub max_unit_size: usize,

    /// Metric for size estimates
    pub size_metric: SizeMetric,

    /// How chunks are partitioned into sub-chunks
    pub sub_chunk: PartitionTarget,

    /// Partition every chunk instead of only oversized ones
    pub partition_all_chunks: bool,

    /// Characters of the previous unit's source passed as context (0 disables)
    pub context_chars: usize,

    /// Translate again chunks whose record holds placeholder text
    pub retranslate_placeholders: bool,

    /// Backoff policy per unit
    pub retry_policy: RetryPolicy,

    /// Minimum time between two provider calls of the same job
    pub min_call_interval: Duration,

    /// Jobs run concurrently by `run_jobs`
    pub max_concurrent_jobs: usize,

    /// Judge each chunk translated by a run
    pub validate_translations: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_unit_size: 4000,
            size_metric: SizeMetric::Tokens,
            sub_chunk: PartitionTarget::default(),
            partition_all_chunks: false,
            context_chars: 200,
            retranslate_placeholders: false,
            retry_policy: RetryPolicy::default(),
            min_call_interval: Duration::from_millis(500),
            max_concurrent_jobs: 2,
            validate_translations: false,
        }
    }
}

impl PipelineConfig {
    /// Build the pipeline configuration from the application configuration
    pub fn from_config(config: &Config) -> Self {
        let chunking = &config.chunking;
        let common = &config.translation.common;
        Self {
            max_unit_size: chunking.max_unit_size,
            size_metric: chunking.size_metric,
            sub_chunk: chunking.sub_chunk,
            partition_all_chunks: chunking.partition_all_chunks,
            context_chars: chunking.context_chars,
            retranslate_placeholders: chunking.retranslate_placeholders,
            retry_policy: common.retry_policy(),
            min_call_interval: common.min_call_interval(),
            max_concurrent_jobs: common.max_concurrent_jobs.max(1),
            validate_translations: common.validate_translations,
        }
    }

    /// Chunks `document` splits into under these settings
    pub fn chunk_plan(&self, document: &Document) -> Result<Vec<Chunk>, PipelineError> {
        let splitter = ChunkSplitter::new(Tokenizer::new(self.size_metric));
        Ok(splitter.split(&document.raw_text, self.max_unit_size)?)
    }

    /// Fingerprint of the chunk plan for `document` under these settings
    pub fn plan_fingerprint(&self, document: &Document) -> Result<String, PipelineError> {
        Ok(plan_fingerprint(&self.chunk_plan(document)?))
    }
}

/// Summary of one `run`
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: String,
    /// Status recorded at the end of the run
    pub status: JobStatus,
    /// Chunks the document splits into
    pub total_chunks: usize,
    /// Chunks translated and persisted by this run
    pub translated_chunks: usize,
    /// Chunks skipped because a record already existed
    pub skipped_chunks: usize,
    /// Chunks persisted by this run that contain placeholder text
    pub placeholder_chunks: usize,
    /// The run stopped early because cancellation was requested
    pub cancelled: bool,
    /// Verdicts for chunks judged by this run
    pub validations: Vec<ChunkValidation>,
}

impl JobOutcome {
    /// Verdicts that rejected their chunk
    pub fn failed_validations(&self) -> impl Iterator<Item = &ChunkValidation> {
        self.validations.iter().filter(|v| !v.validation.is_valid)
    }
}

/// A job to run through `run_jobs`
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: String,
    pub document: Document,
}

/// Progress callback: `(chunks done, total chunks)`
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Translation of one chunk, ready to persist
#[derive(Debug)]
struct ChunkTranslation {
    text: String,
    has_placeholder: bool,
}

/// Placeholder persisted for a unit that could not be translated
pub fn placeholder_text(chunk_id: u32, sub_chunk_id: u32, source_text: &str) -> String {
    format!("[UNTRANSLATED {}.{}]\n{}", chunk_id, sub_chunk_id, source_text)
}

/// `text` without the header lines `placeholder_text` adds
pub fn strip_placeholder_headers(text: &str) -> String {
    text.lines()
        .filter(|line| !(line.starts_with("[UNTRANSLATED ") && line.ends_with(']')))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Coordinates splitting, translation and persistence of jobs
pub struct PipelineOrchestrator<'a, P: Provider, S: ChunkStore> {
    provider: &'a P,
    store: &'a S,
    config: PipelineConfig,
    splitter: ChunkSplitter,
    partitioner: SubChunkPartitioner,
    progress: Option<ProgressCallback>,
}

impl<'a, P: Provider, S: ChunkStore> PipelineOrchestrator<'a, P, S> {
    pub fn new(provider: &'a P, store: &'a S, config: PipelineConfig) -> Self {
        let tokenizer = Tokenizer::new(config.size_metric);
        Self {
            provider,
            store,
            splitter: ChunkSplitter::new(tokenizer),
            partitioner: SubChunkPartitioner::new(tokenizer),
            config,
            progress: None,
        }
    }

    /// Report progress after every chunk
    pub fn with_progress(mut self, callback: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Chunks the document splits into under the current configuration
    pub fn plan(&self, document: &Document) -> Result<Vec<Chunk>, PipelineError> {
        Ok(self.splitter.split(&document.raw_text, self.config.max_unit_size)?)
    }

    /// Run (or resume) a job until every chunk is persisted, cancellation is
    /// observed, or an unrecoverable error occurs.
    pub async fn run(
        &self,
        job_id: &str,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, PipelineError> {
        let job = self.store.get_job(job_id).await?;
        let chunks = self.plan(document)?;
        let fingerprint = plan_fingerprint(&chunks);
        if !job.accepts_plan(&fingerprint) {
            error!(
                "Job {} was chunked under different settings; refusing to reuse its records",
                short_id(job_id)
            );
            return Err(PipelineError::PlanMismatch {
                job_id: job_id.to_string(),
            });
        }

        if job.status.is_terminal() {
            info!("Job {} is already completed", short_id(job_id));
            let persisted = self.store.list_chunks(job_id).await?;
            return Ok(JobOutcome {
                job_id: job_id.to_string(),
                status: JobStatus::Completed,
                total_chunks: persisted.len(),
                translated_chunks: 0,
                skipped_chunks: persisted.len(),
                placeholder_chunks: 0,
                cancelled: false,
                validations: Vec::new(),
            });
        }

        self.store.set_job_status(job_id, JobStatus::Translating).await?;

        match self.process(job_id, chunks, &fingerprint, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Job {} failed: {}", short_id(job_id), e);
                self.mark_error(job_id).await;
                Err(e)
            }
        }
    }

    async fn process(
        &self,
        job_id: &str,
        mut chunks: Vec<Chunk>,
        fingerprint: &str,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, PipelineError> {
        let total = chunks.len();
        self.store.set_chunk_plan(job_id, total as u32, fingerprint).await?;

        let persisted = self.store.list_chunks(job_id).await?;
        let redo = self.chunks_to_redo(job_id).await?;
        info!(
            "Job {}: {} chunks, {} already persisted",
            short_id(job_id),
            total,
            persisted.len()
        );

        let mut retry = RetryController::new(self.config.retry_policy, self.config.min_call_interval);
        let mut outcome = JobOutcome {
            job_id: job_id.to_string(),
            status: JobStatus::Translating,
            total_chunks: total,
            translated_chunks: 0,
            skipped_chunks: 0,
            placeholder_chunks: 0,
            cancelled: false,
            validations: Vec::new(),
        };
        let mut context: Option<String> = None;

        for (done, chunk) in chunks.iter_mut().enumerate() {
            if cancel.is_cancelled() {
                warn!("Job {} cancelled after {} of {} chunks", short_id(job_id), done, total);
                outcome.cancelled = true;
                break;
            }

            if persisted.contains(&chunk.id) && !redo.contains(&chunk.id) {
                debug!("Chunk {} already persisted, skipping", chunk.id);
                outcome.skipped_chunks += 1;
            } else {
                let translation = self.translate_chunk(&mut retry, chunk, context.as_deref()).await?;
                self.store
                    .upsert_chunk(job_id, chunk.id, &translation.text, translation.has_placeholder)
                    .await?;
                outcome.translated_chunks += 1;
                if translation.has_placeholder {
                    outcome.placeholder_chunks += 1;
                } else if self.config.validate_translations {
                    if let Some(verdict) = self.validate_chunk(&mut retry, chunk, &translation.text).await {
                        outcome.validations.push(verdict);
                    }
                }
            }

            context = self.context_tail(&chunk.source_text);
            self.report_progress(done + 1, total);
        }

        let persisted = self.store.list_chunks(job_id).await?;
        let complete = chunks.iter().all(|chunk| persisted.contains(&chunk.id));
        let status = if complete { JobStatus::Completed } else { JobStatus::Error };
        self.store.set_job_status(job_id, status).await?;
        outcome.status = status;

        info!(
            "Job {} finished as {}: {} translated, {} skipped, {} with placeholders",
            short_id(job_id),
            status,
            outcome.translated_chunks,
            outcome.skipped_chunks,
            outcome.placeholder_chunks
        );
        Ok(outcome)
    }

    /// Persisted chunks that must be translated again
    async fn chunks_to_redo(&self, job_id: &str) -> Result<BTreeSet<u32>, StoreError> {
        if !self.config.retranslate_placeholders {
            return Ok(BTreeSet::new());
        }
        Ok(self
            .store
            .get_chunks(job_id)
            .await?
            .into_iter()
            .filter(|record| record.has_placeholder)
            .map(|record| record.chunk_id)
            .collect())
    }

    async fn translate_chunk(
        &self,
        retry: &mut RetryController,
        chunk: &mut Chunk,
        context: Option<&str>,
    ) -> Result<ChunkTranslation, PipelineError> {
        let mut units = if chunk.oversized || self.config.partition_all_chunks {
            self.partitioner.partition(chunk, self.config.sub_chunk)
        } else {
            vec![SubChunk::new(0, chunk.source_text.as_str(), chunk.positional_marker.clone())]
        };
        debug!(
            "Translating chunk {} ({} units, size {})",
            chunk.id,
            units.len(),
            chunk.estimated_size
        );

        let mut text = String::with_capacity(chunk.source_text.len());
        let mut has_placeholder = false;
        let mut carried: Option<String> = context.map(str::to_string);

        for unit in units.iter_mut() {
            let source = unit.source_text.as_str();
            let unit_context = carried.as_deref();
            let result = retry
                .call(|| self.provider.translate(source, unit_context))
                .await;

            let translated = match result {
                Ok(translated) => translated,
                Err(e) if e.is_recoverable() => {
                    warn!("Chunk {}.{} left untranslated: {}", chunk.id, unit.id, e);
                    has_placeholder = true;
                    placeholder_text(chunk.id, unit.id, source)
                }
                Err(e) => return Err(PipelineError::Provider(e.provider_error().clone())),
            };

            // Keep the whitespace that separated this unit from the next one
            let trailing = &source[source.trim_end().len()..];
            text.push_str(translated.trim_end());
            text.push_str(trailing);

            carried = self.context_tail(source);
            unit.translated_text = Some(translated);
        }

        chunk.sub_chunks = units;
        Ok(ChunkTranslation { text, has_placeholder })
    }

    /// Judge a persisted chunk; a failed judge call is logged and skipped
    async fn validate_chunk(
        &self,
        retry: &mut RetryController,
        chunk: &Chunk,
        translated: &str,
    ) -> Option<ChunkValidation> {
        let source = chunk.source_text.as_str();
        match retry.call(|| self.provider.validate(source, translated)).await {
            Ok(validation) => {
                if validation.is_valid {
                    debug!("Chunk {} passed validation ({:.2})", chunk.id, validation.score);
                } else {
                    warn!(
                        "Chunk {} failed validation ({:.2}): {}",
                        chunk.id,
                        validation.score,
                        validation.issues.join("; ")
                    );
                }
                Some(ChunkValidation {
                    chunk_id: chunk.id,
                    validation,
                })
            }
            Err(e) => {
                warn!("Chunk {} could not be validated: {}", chunk.id, e);
                None
            }
        }
    }

    fn context_tail(&self, source: &str) -> Option<String> {
        tail_chars(source, self.config.context_chars).map(str::to_string)
    }

    fn report_progress(&self, done: usize, total: usize) {
        if let Some(progress) = &self.progress {
            progress(done, total);
        }
    }

    async fn mark_error(&self, job_id: &str) {
        if let Err(e) = self.store.set_job_status(job_id, JobStatus::Error).await {
            error!("Failed to mark job {} as error: {}", short_id(job_id), e);
        }
    }

    /// Join the persisted chunk translations in order.
    ///
    /// Fails with `PipelineError::Incomplete` while any chunk has no record.
    pub async fn reassemble(&self, job_id: &str, document: &Document) -> Result<String, PipelineError> {
        let mut output = String::new();
        for (chunk, record) in self.completed_chunks(job_id, document).await? {
            output.push_str(chunk.separator.as_str());
            output.push_str(&record.translated_text);
        }
        Ok(output)
    }

    /// Source and translated sentences of a completed job, paired chunk by chunk.
    ///
    /// Placeholder headers are dropped, so untranslated sentences pair with
    /// their own source text.
    pub async fn sentence_pairs(
        &self,
        job_id: &str,
        document: &Document,
    ) -> Result<Vec<SentencePair>, PipelineError> {
        let mut pairs: Vec<SentencePair> = Vec::new();
        for (chunk, record) in self.completed_chunks(job_id, document).await? {
            let translated = if record.has_placeholder {
                strip_placeholder_headers(&record.translated_text)
            } else {
                record.translated_text
            };
            let offset = pairs.len();
            pairs.extend(
                create_sentence_pairs(&chunk.source_text, &translated)
                    .into_iter()
                    .map(|pair| SentencePair {
                        index: offset + pair.index,
                        ..pair
                    }),
            );
        }
        Ok(pairs)
    }

    /// Every chunk of the plan with its record, once the job is complete
    async fn completed_chunks(
        &self,
        job_id: &str,
        document: &Document,
    ) -> Result<Vec<(Chunk, ChunkRecord)>, PipelineError> {
        let chunks = self.plan(document)?;
        if !self.store.get_job(job_id).await?.accepts_plan(&plan_fingerprint(&chunks)) {
            return Err(PipelineError::PlanMismatch {
                job_id: job_id.to_string(),
            });
        }
        let mut records: HashMap<u32, ChunkRecord> = self
            .store
            .get_chunks(job_id)
            .await?
            .into_iter()
            .map(|record| (record.chunk_id, record))
            .collect();

        let missing = chunks.iter().filter(|c| !records.contains_key(&c.id)).count();
        if missing > 0 {
            return Err(PipelineError::Incomplete {
                job_id: job_id.to_string(),
                missing,
                total: chunks.len(),
            });
        }

        Ok(chunks
            .into_iter()
            .filter_map(|chunk| records.remove(&chunk.id).map(|record| (chunk, record)))
            .collect())
    }

    /// Run several jobs concurrently, at most `max_concurrent_jobs` at a time.
    ///
    /// Each job gets its own retry controller and is processed sequentially.
    /// Results are returned in the order of `jobs`.
    pub async fn run_jobs(
        &self,
        jobs: &[JobRequest],
        cancel: &CancellationToken,
    ) -> Vec<(String, Result<JobOutcome, PipelineError>)> {
        let mut results: Vec<(usize, String, Result<JobOutcome, PipelineError>)> =
            stream::iter(jobs.iter().enumerate())
                .map(|(index, job)| async move {
                    let result = self.run(&job.job_id, &job.document, cancel).await;
                    (index, job.job_id.clone(), result)
                })
                .buffer_unordered(self.config.max_concurrent_jobs.max(1))
                .collect()
                .await;

        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, job_id, result)| (job_id, result))
            .collect()
    }
}

/// Last `count` characters of `text`, or `None` when `count` is zero or the text is blank
pub fn tail_chars(text: &str, count: usize) -> Option<&str> {
    if count == 0 || text.trim().is_empty() {
        return None;
    }
    let start = text
        .char_indices()
        .rev()
        .nth(count - 1)
        .map(|(index, _)| index)
        .unwrap_or(0);
    Some(&text[start..])
}
