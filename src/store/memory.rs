/*!
 * In-memory chunk store.
 *
 * Keeps jobs, chunk records and documents behind a single mutex. Cloning the
 * store shares the underlying state, so several jobs can run against one
 * instance concurrently.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::models::{ChunkRecord, JobStatus, NewJob, TranslationJob};
use super::{check_transition, ChunkStore, DocumentSource};
use crate::errors::StoreError;
use crate::translation::document::Document;

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<String, TranslationJob>,
    chunks: HashMap<String, BTreeMap<u32, ChunkRecord>>,
    documents: HashMap<String, Document>,
    /// Number of upcoming upserts that fail with a backend error
    #[cfg(test)]
    failing_upserts: usize,
    /// Total successful upsert calls
    #[cfg(test)]
    upsert_calls: usize,
}

/// Process-local `ChunkStore` and `DocumentSource`
#[derive(Debug, Clone, Default)]
pub struct MemoryChunkStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document so that `get_document` can find it
    pub fn insert_document(&self, document: Document) {
        self.inner
            .lock()
            .documents
            .insert(document.id.clone(), document);
    }

    /// Make the next `count` upserts fail, simulating a storage outage
    #[cfg(test)]
    pub(crate) fn fail_next_upserts(&self, count: usize) {
        self.inner.lock().failing_upserts = count;
    }

    /// Number of successful upsert calls so far
    #[cfg(test)]
    pub(crate) fn upsert_calls(&self) -> usize {
        self.inner.lock().upsert_calls
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn create_job(&self, params: NewJob) -> Result<TranslationJob, StoreError> {
        let job = TranslationJob::new(params);
        self.inner.lock().jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> Result<TranslationJob, StoreError> {
        self.inner
            .lock()
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }

    async fn upsert_chunk(
        &self,
        job_id: &str,
        chunk_id: u32,
        translated_text: &str,
        has_placeholder: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();

        #[cfg(test)]
        {
            if inner.failing_upserts > 0 {
                inner.failing_upserts -= 1;
                return Err(StoreError::Backend("simulated write failure".to_string()));
            }
        }
        if !inner.jobs.contains_key(job_id) {
            return Err(StoreError::JobNotFound(job_id.to_string()));
        }

        let record = ChunkRecord {
            job_id: job_id.to_string(),
            chunk_id,
            translated_text: translated_text.to_string(),
            has_placeholder,
            updated_at: chrono::Utc::now().to_rfc3339(),
        };
        inner
            .chunks
            .entry(job_id.to_string())
            .or_default()
            .insert(chunk_id, record);
        #[cfg(test)]
        {
            inner.upsert_calls += 1;
        }
        Ok(())
    }

    async fn list_chunks(&self, job_id: &str) -> Result<BTreeSet<u32>, StoreError> {
        Ok(self
            .inner
            .lock()
            .chunks
            .get(job_id)
            .map(|records| records.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn get_chunks(&self, job_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .chunks
            .get(job_id)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;

        check_transition(job_id, job.status, status)?;
        job.status = status;
        job.updated_at = chrono::Utc::now().to_rfc3339();
        Ok(())
    }

    async fn set_chunk_plan(
        &self,
        job_id: &str,
        total_chunks: u32,
        plan_fingerprint: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        job.total_chunks = Some(total_chunks);
        job.plan_fingerprint = Some(plan_fingerprint.to_string());
        job.updated_at = chrono::Utc::now().to_rfc3339();
        Ok(())
    }
}

#[async_trait]
impl DocumentSource for MemoryChunkStore {
    async fn get_document(&self, document_id: &str) -> Result<Document, StoreError> {
        self.inner
            .lock()
            .documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| StoreError::DocumentNotFound(document_id.to_string()))
    }
}
