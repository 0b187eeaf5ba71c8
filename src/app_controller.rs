use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::app_config::{Config, OutputFormat};
use crate::database::Repository;
use crate::errors::ProviderErrorKind;
use crate::file_utils::FileManager;
use crate::providers::{MockProvider, Provider, ProviderClient};
use crate::store::{ChunkStore, JobStatus, MemoryChunkStore, NewJob, TranslationJob};
use crate::translation::{render_bilingual, Document, JobOutcome, PipelineConfig, PipelineOrchestrator};

// @module: Application controller for document translation

/// What to translate and where to write it
#[derive(Debug, Clone)]
pub struct TranslateRequest {
    // @field: Source text file
    pub input: PathBuf,
    // @field: Output file, `<stem>.<target>.txt` next to the input when unset
    pub output: Option<PathBuf>,
    // @field: Overwrite an existing output file
    pub force_overwrite: bool,
    // @field: Use the mock provider and an in-memory database
    pub dry_run: bool,
}

/// Result of a `translate_file` call
#[derive(Debug, Clone)]
pub struct TranslateSummary {
    pub job_id: String,
    pub outcome: JobOutcome,
    /// Set when the translation was complete and written
    pub output_path: Option<PathBuf>,
    pub elapsed: Duration,
}

/// Job details for `longform status`
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: TranslationJob,
    pub persisted_chunks: usize,
    pub placeholder_chunks: usize,
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self
            .job
            .total_chunks
            .map(|t| t.to_string())
            .unwrap_or_else(|| "?".to_string());
        writeln!(f, "Job:         {}", self.job.id)?;
        writeln!(f, "Document:    {}", self.job.document_id)?;
        writeln!(f, "Provider:    {} ({})", self.job.provider, self.job.model)?;
        writeln!(f, "Target:      {}", self.job.target_language)?;
        writeln!(f, "Status:      {}", self.job.status)?;
        writeln!(f, "Chunks:      {}/{}", self.persisted_chunks, total)?;
        writeln!(f, "Placeholders: {}", self.placeholder_chunks)?;
        write!(f, "Updated:     {}", self.job.updated_at)
    }
}

/// Main application controller for document translation
pub struct Controller {
    // @field: App configuration
    config: Config,
}

impl Controller {
    // @method: Create a new controller with the given configuration
    pub fn with_config(config: Config) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Output path used when the request does not name one
    pub fn default_output_path(&self, input: &Path) -> PathBuf {
        FileManager::generate_output_path(input, &self.config.target_language, "txt")
    }

    fn open_repository(&self) -> Result<Repository> {
        let path = self.config.storage.resolved_database_path();
        Repository::open(&path).with_context(|| format!("Failed to open job database at {:?}", path))
    }

    /// Translate a text file, resuming the unfinished job for the same
    /// document, provider, model, target language and chunk plan when there
    /// is one.
    ///
    /// Returns `None` when the output exists and overwriting is not allowed.
    pub async fn translate_file(
        &self,
        request: &TranslateRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<TranslateSummary>> {
        let start_time = Instant::now();

        if !request.input.is_file() {
            return Err(anyhow!("Input file does not exist: {:?}", request.input));
        }

        let output_path = request
            .output
            .clone()
            .unwrap_or_else(|| self.default_output_path(&request.input));
        if output_path.exists() && !request.force_overwrite {
            warn!(
                "Skipping {:?}, translation already exists (use -f to force overwrite)",
                output_path
            );
            return Ok(None);
        }

        let text = FileManager::read_to_string(&request.input)?;
        let document = Document::from_text(text);

        let (job_id, outcome, written) = if request.dry_run {
            info!("Dry run: using the mock provider and an in-memory store");
            let provider = ProviderClient::Mock(MockProvider::with_prefix(format!(
                "[{}] ",
                self.config.target_language
            )));
            let store = MemoryChunkStore::new();
            store.insert_document(document.clone());
            let job = store
                .create_job(NewJob::new(
                    &document.id,
                    provider.name(),
                    self.config.translation.get_model(),
                    self.config.target_language.as_str(),
                ))
                .await?;
            self.run_job(&provider, &store, job, &document, &output_path, cancel).await?
        } else {
            let provider = ProviderClient::from_config(&self.config)?;
            self.check_provider(&provider).await?;
            let repository = self.open_repository()?;
            repository.insert_document(&document).await?;
            let job = self.resume_or_create_job(&repository, &provider, &document).await?;
            self.run_job(&provider, &repository, job, &document, &output_path, cancel).await?
        };

        let elapsed = start_time.elapsed();
        info!("Finished in {}", Self::format_duration(elapsed));

        Ok(Some(TranslateSummary {
            job_id,
            outcome,
            output_path: written,
            elapsed,
        }))
    }

    /// Drive one job with a progress bar and write the output once it is complete
    async fn run_job<S: ChunkStore>(
        &self,
        provider: &ProviderClient,
        store: &S,
        job: TranslationJob,
        document: &Document,
        output_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(String, JobOutcome, Option<PathBuf>)> {
        info!(
            "Translating with {} ({}) into {}",
            provider.name(),
            self.config.translation.get_model(),
            self.config.target_language
        );

        let progress_bar = Self::progress_bar();
        let bar = progress_bar.clone();
        let orchestrator =
            PipelineOrchestrator::new(provider, store, PipelineConfig::from_config(&self.config))
                .with_progress(move |done, total| {
                    bar.set_length(total as u64);
                    bar.set_position(done as u64);
                });

        let outcome = match orchestrator.run(&job.id, document, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                progress_bar.abandon_with_message("failed");
                error!("Job {} can be resumed by running the same command again", job.id);
                return Err(e.into());
            }
        };

        let mut written = None;
        if outcome.status == JobStatus::Completed {
            progress_bar.finish_with_message("done");
            let translated = match self.config.output_format {
                OutputFormat::Text => orchestrator.reassemble(&job.id, document).await?,
                OutputFormat::Bilingual => {
                    render_bilingual(&orchestrator.sentence_pairs(&job.id, document).await?)
                }
            };
            FileManager::write_to_file(output_path, &translated)?;
            info!("Success: {}", output_path.display());
            written = Some(output_path.to_path_buf());
        } else {
            progress_bar.abandon_with_message("interrupted");
            warn!(
                "Job {} stopped with {} of {} chunks; run the same command again to resume",
                job.id,
                outcome.translated_chunks + outcome.skipped_chunks,
                outcome.total_chunks
            );
        }

        if outcome.placeholder_chunks > 0 {
            warn!(
                "{} chunk(s) contain untranslated placeholders (set chunking.retranslate_placeholders to retry them)",
                outcome.placeholder_chunks
            );
        }

        let failed: Vec<String> = outcome
            .failed_validations()
            .map(|v| format!("{} ({:.2})", v.chunk_id, v.validation.score))
            .collect();
        if !failed.is_empty() {
            warn!("{} chunk(s) failed validation: {}", failed.len(), failed.join(", "));
        }

        Ok((job.id, outcome, written))
    }

    /// Fail early on configuration problems the provider reports as fatal
    async fn check_provider(&self, provider: &ProviderClient) -> Result<()> {
        match provider.test_connection().await {
            Ok(()) => {
                debug!("Provider {} is reachable", provider.name());
                Ok(())
            }
            Err(e) if e.kind == ProviderErrorKind::Fatal => {
                Err(anyhow!("Provider {} rejected the connection test: {}", provider.name(), e))
            }
            Err(e) => {
                warn!("Connection test for {} failed, continuing: {}", provider.name(), e);
                Ok(())
            }
        }
    }

    async fn resume_or_create_job(
        &self,
        repository: &Repository,
        provider: &ProviderClient,
        document: &Document,
    ) -> Result<TranslationJob> {
        let model = self.config.translation.get_model();
        let target = &self.config.target_language;
        let fingerprint = PipelineConfig::from_config(&self.config).plan_fingerprint(document)?;

        if let Some(job) = repository
            .find_resumable_job(&document.id, provider.name(), &model, target, &fingerprint)
            .await?
        {
            let done = repository.list_chunks(&job.id).await?.len();
            info!(
                "Resuming job {} ({} chunks already translated)",
                job.short_id(),
                done
            );
            return Ok(job);
        }

        let job = repository
            .create_job(NewJob::new(&document.id, provider.name(), model, target.as_str()))
            .await?;
        info!("Created job {}", job.id);
        Ok(job)
    }

    /// Status of one job in the configured database
    pub async fn status(&self, job_id: &str) -> Result<JobReport> {
        let repository = self.open_repository()?;
        Self::job_report(&repository, job_id).await
    }

    pub async fn job_report(store: &impl ChunkStore, job_id: &str) -> Result<JobReport> {
        let job = store.get_job(job_id).await?;
        let records = store.get_chunks(job_id).await?;
        Ok(JobReport {
            persisted_chunks: records.len(),
            placeholder_chunks: records.iter().filter(|r| r.has_placeholder).count(),
            job,
        })
    }

    /// Most recent jobs in the configured database
    pub async fn jobs(&self, limit: usize) -> Result<Vec<TranslationJob>> {
        let repository = self.open_repository()?;
        Ok(repository.list_jobs(limit).await?)
    }

    fn progress_bar() -> ProgressBar {
        let progress_bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg} {eta}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress_bar.set_style(style.progress_chars("█▓▒░"));
        progress_bar
    }

    // Format duration in a human-readable format
    fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}.{:03}s", seconds, duration.subsec_millis())
        }
    }
}
