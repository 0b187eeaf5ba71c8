/*!
 * Durable storage contracts for translation jobs.
 *
 * The pipeline talks to persistence only through the `ChunkStore` and
 * `DocumentSource` traits. Two implementations ship with the crate:
 * - `memory::MemoryChunkStore`: process-local, used by tests and dry runs
 * - `crate::database::Repository`: SQLite-backed, used by the CLI
 */

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::errors::StoreError;
use crate::translation::document::Document;

pub mod memory;
pub mod models;

pub use memory::MemoryChunkStore;
pub use models::{ChunkRecord, JobStatus, NewJob, TranslationJob};

/// Persistence of per-chunk results and job status.
///
/// Implementations must make `upsert_chunk` idempotent on `(job_id, chunk_id)`
/// and safe to call concurrently for different jobs.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Create a new job in `pending` state
    async fn create_job(&self, params: NewJob) -> Result<TranslationJob, StoreError>;

    /// Fetch a job by id
    async fn get_job(&self, job_id: &str) -> Result<TranslationJob, StoreError>;

    /// Insert or overwrite the translation of one chunk
    async fn upsert_chunk(
        &self,
        job_id: &str,
        chunk_id: u32,
        translated_text: &str,
        has_placeholder: bool,
    ) -> Result<(), StoreError>;

    /// Ids of every chunk persisted for the job
    async fn list_chunks(&self, job_id: &str) -> Result<BTreeSet<u32>, StoreError>;

    /// All chunk records for the job, ordered by chunk id
    async fn get_chunks(&self, job_id: &str) -> Result<Vec<ChunkRecord>, StoreError>;

    /// Move the job to `status`, rejecting transitions the lifecycle forbids
    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<(), StoreError>;

    /// Record the chunk plan the job's records are produced under: how many
    /// chunks the document splits into and the plan's fingerprint
    async fn set_chunk_plan(
        &self,
        job_id: &str,
        total_chunks: u32,
        plan_fingerprint: &str,
    ) -> Result<(), StoreError>;

    /// Current job status
    async fn get_job_status(&self, job_id: &str) -> Result<JobStatus, StoreError> {
        Ok(self.get_job(job_id).await?.status)
    }
}

/// Read-only access to source documents
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn get_document(&self, document_id: &str) -> Result<Document, StoreError>;
}

/// Check a status change against the job lifecycle
pub(crate) fn check_transition(
    job_id: &str,
    from: JobStatus,
    to: JobStatus,
) -> Result<(), StoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            job_id: job_id.to_string(),
            from,
            to,
        })
    }
}
