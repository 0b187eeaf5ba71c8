/*!
 * Repository layer for database operations.
 *
 * `Repository` is the SQLite-backed `ChunkStore` and `DocumentSource`.
 * Chunk upserts commit one row at a time, so a crash loses at most the
 * chunk that was in flight.
 */

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;

use super::connection::DatabaseConnection;
use crate::errors::StoreError;
use crate::store::models::short_id;
use crate::store::{
    check_transition, ChunkRecord, ChunkStore, DocumentSource, JobStatus, NewJob, TranslationJob,
};
use crate::translation::document::Document;

const JOB_COLUMNS: &str = "id, document_id, provider, model, target_language, status, total_chunks, plan_fingerprint, created_at, updated_at";

/// Repository for database operations
#[derive(Clone, Debug)]
pub struct Repository {
    db: DatabaseConnection,
}

impl Repository {
    /// Create a new repository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Open the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(DatabaseConnection::new(path)?))
    }

    /// Create a repository with an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        Ok(Self::new(DatabaseConnection::new_in_memory()?))
    }

    pub fn path(&self) -> &Path {
        self.db.path()
    }

    // =========================================================================
    // Document Operations
    // =========================================================================

    /// Store a document; inserting the same id again keeps the original row
    pub async fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        let document = document.clone();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO documents (id, raw_text, created_at) VALUES (?1, ?2, ?3)",
                    params![document.id, document.raw_text, document.created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    fn parse_job_row(row: &rusqlite::Row) -> rusqlite::Result<TranslationJob> {
        Ok(TranslationJob {
            id: row.get(0)?,
            document_id: row.get(1)?,
            provider: row.get(2)?,
            model: row.get(3)?,
            target_language: row.get(4)?,
            status: Self::parse_status(row, 5)?,
            total_chunks: row.get(6)?,
            plan_fingerprint: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn parse_status(row: &rusqlite::Row, index: usize) -> rusqlite::Result<JobStatus> {
        let raw: String = row.get(index)?;
        raw.parse().map_err(|e: anyhow::Error| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::<dyn std::error::Error + Send + Sync>::from(e),
            )
        })
    }

    fn get_job_sync(conn: &Connection, job_id: &str) -> Result<Option<TranslationJob>> {
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                [job_id],
                Self::parse_job_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Latest unfinished job for the same document, provider, model and
    /// target language whose records were produced under `plan_fingerprint`.
    ///
    /// A job that has not recorded a plan yet matches any fingerprint.
    pub async fn find_resumable_job(
        &self,
        document_id: &str,
        provider: &str,
        model: &str,
        target_language: &str,
        plan_fingerprint: &str,
    ) -> Result<Option<TranslationJob>, StoreError> {
        let key = (
            document_id.to_string(),
            provider.to_string(),
            model.to_string(),
            target_language.to_string(),
            plan_fingerprint.to_string(),
        );

        self.db
            .execute_async(move |conn| {
                let job = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM jobs
                             WHERE document_id = ?1 AND provider = ?2 AND model = ?3
                               AND target_language = ?4 AND status != 'completed'
                               AND (plan_fingerprint IS NULL OR plan_fingerprint = ?5)
                             ORDER BY updated_at DESC, rowid DESC LIMIT 1",
                            JOB_COLUMNS
                        ),
                        params![key.0, key.1, key.2, key.3, key.4],
                        Self::parse_job_row,
                    )
                    .optional()?;
                Ok(job)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Most recently updated jobs first
    pub async fn list_jobs(&self, limit: usize) -> Result<Vec<TranslationJob>, StoreError> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM jobs ORDER BY updated_at DESC, rowid DESC LIMIT ?1",
                    JOB_COLUMNS
                ))?;
                let jobs = stmt
                    .query_map([limit as i64], Self::parse_job_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(jobs)
            })
            .await
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl ChunkStore for Repository {
    async fn create_job(&self, params: NewJob) -> Result<TranslationJob, StoreError> {
        let job = TranslationJob::new(params);
        let row = job.clone();

        self.db
            .execute_async(move |conn| {
                let known: bool = conn.query_row(
                    "SELECT COUNT(*) FROM documents WHERE id = ?1",
                    [&row.document_id],
                    |r| r.get(0),
                )?;
                if !known {
                    return Err(StoreError::DocumentNotFound(row.document_id.clone()).into());
                }

                conn.execute(
                    &format!(
                        "INSERT INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        JOB_COLUMNS
                    ),
                    params![
                        row.id,
                        row.document_id,
                        row.provider,
                        row.model,
                        row.target_language,
                        row.status.to_string(),
                        row.total_chunks,
                        row.plan_fingerprint,
                        row.created_at,
                        row.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!("Created job {} for document {}", job.short_id(), short_id(&job.document_id));
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> Result<TranslationJob, StoreError> {
        let id = job_id.to_string();
        self.db
            .execute_async(move |conn| Self::get_job_sync(conn, &id))
            .await?
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }

    async fn upsert_chunk(
        &self,
        job_id: &str,
        chunk_id: u32,
        translated_text: &str,
        has_placeholder: bool,
    ) -> Result<(), StoreError> {
        let job_id = job_id.to_string();
        let translated_text = translated_text.to_string();
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .execute_async(move |conn| {
                if Self::get_job_sync(conn, &job_id)?.is_none() {
                    return Err(StoreError::JobNotFound(job_id).into());
                }
                conn.execute(
                    r#"
                    INSERT INTO chunk_records (job_id, chunk_id, translated_text, has_placeholder, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(job_id, chunk_id) DO UPDATE SET
                        translated_text = excluded.translated_text,
                        has_placeholder = excluded.has_placeholder,
                        updated_at = excluded.updated_at
                    "#,
                    params![job_id, chunk_id, translated_text, has_placeholder, now],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    async fn list_chunks(&self, job_id: &str) -> Result<BTreeSet<u32>, StoreError> {
        let job_id = job_id.to_string();
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare("SELECT chunk_id FROM chunk_records WHERE job_id = ?1")?;
                let ids = stmt
                    .query_map([&job_id], |row| row.get::<_, u32>(0))?
                    .collect::<rusqlite::Result<BTreeSet<_>>>()?;
                Ok(ids)
            })
            .await
            .map_err(StoreError::from)
    }

    async fn get_chunks(&self, job_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        let job_id = job_id.to_string();
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT job_id, chunk_id, translated_text, has_placeholder, updated_at
                    FROM chunk_records WHERE job_id = ?1 ORDER BY chunk_id
                    "#,
                )?;
                let records = stmt
                    .query_map([&job_id], |row| {
                        Ok(ChunkRecord {
                            job_id: row.get(0)?,
                            chunk_id: row.get(1)?,
                            translated_text: row.get(2)?,
                            has_placeholder: row.get(3)?,
                            updated_at: row.get(4)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(records)
            })
            .await
            .map_err(StoreError::from)
    }

    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<(), StoreError> {
        let job_id = job_id.to_string();
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .transaction_async(move |tx| {
                let job = Self::get_job_sync(tx, &job_id)?
                    .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
                check_transition(&job_id, job.status, status)?;

                tx.execute(
                    "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![status.to_string(), now, job_id],
                )?;
                debug!("Job {}: {} -> {}", short_id(&job_id), job.status, status);
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    async fn set_chunk_plan(
        &self,
        job_id: &str,
        total_chunks: u32,
        plan_fingerprint: &str,
    ) -> Result<(), StoreError> {
        let job_id = job_id.to_string();
        let plan_fingerprint = plan_fingerprint.to_string();
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .execute_async(move |conn| {
                let updated = conn.execute(
                    "UPDATE jobs SET total_chunks = ?1, plan_fingerprint = ?2, updated_at = ?3 WHERE id = ?4",
                    params![total_chunks, plan_fingerprint, now, job_id],
                )?;
                if updated == 0 {
                    return Err(StoreError::JobNotFound(job_id).into());
                }
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl DocumentSource for Repository {
    async fn get_document(&self, document_id: &str) -> Result<Document, StoreError> {
        let id = document_id.to_string();
        self.db
            .execute_async(move |conn| {
                let document = conn
                    .query_row(
                        "SELECT id, raw_text, created_at FROM documents WHERE id = ?1",
                        [&id],
                        |row| {
                            Ok(Document {
                                id: row.get(0)?,
                                raw_text: row.get(1)?,
                                created_at: row.get(2)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(document)
            })
            .await?
            .ok_or_else(|| StoreError::DocumentNotFound(document_id.to_string()))
    }
}
