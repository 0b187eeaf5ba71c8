/*!
 * Persisted job and chunk models.
 *
 * These structures map directly to the stored rows and are shared by every
 * `ChunkStore` implementation.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Job status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job created, no work started
    Pending,
    /// The orchestrator is (or was, before a crash) working on the job
    Translating,
    /// Every chunk has a persisted record
    Completed,
    /// The last run stopped before every chunk was persisted
    Error,
}

impl JobStatus {
    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `translating -> translating` covers a run that crashed without
    /// recording a terminal status; `error -> translating` is a resume.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Translating)
                | (Translating, Translating)
                | (Translating, Completed)
                | (Translating, Error)
                | (Error, Translating)
                | (Error, Error)
        )
    }

    /// Whether no further work is planned for the job
    pub fn is_terminal(self) -> bool {
        self == JobStatus::Completed
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Translating => write!(f, "translating"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "translating" => Ok(JobStatus::Translating),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// Parameters for creating a translation job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub document_id: String,
    pub provider: String,
    pub model: String,
    pub target_language: String,
}

impl NewJob {
    pub fn new(
        document_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            provider: provider.into(),
            model: model.into(),
            target_language: target_language.into(),
        }
    }
}

/// A translation job row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationJob {
    /// Unique job identifier (UUID v4)
    pub id: String,
    /// Document being translated
    pub document_id: String,
    /// Provider identifier
    pub provider: String,
    /// Model name
    pub model: String,
    /// Target language code
    pub target_language: String,
    /// Current status
    pub status: JobStatus,
    /// Number of chunks the document splits into, once known
    pub total_chunks: Option<u32>,
    /// Fingerprint of the chunk plan the records were produced under
    pub plan_fingerprint: Option<String>,
    /// Creation timestamp (RFC3339)
    pub created_at: String,
    /// Last update timestamp (RFC3339)
    pub updated_at: String,
}

impl TranslationJob {
    /// Whether records stored under this job line up with the given plan.
    ///
    /// A job that never recorded a plan accepts any.
    pub fn accepts_plan(&self, fingerprint: &str) -> bool {
        self.plan_fingerprint
            .as_deref()
            .is_none_or(|recorded| recorded == fingerprint)
    }

    /// Create a new pending job with a fresh id
    pub fn new(params: NewJob) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: params.document_id,
            provider: params.provider,
            model: params.model,
            target_language: params.target_language,
            status: JobStatus::Pending,
            total_chunks: None,
            plan_fingerprint: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Short id for log lines
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// A persisted per-chunk translation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub job_id: String,
    pub chunk_id: u32,
    pub translated_text: String,
    /// At least one unit of the chunk failed and holds placeholder text
    pub has_placeholder: bool,
    /// Last update timestamp (RFC3339)
    pub updated_at: String,
}

/// First eight characters of an id, for logging
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
