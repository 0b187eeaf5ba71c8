/*!
 * Error types for the longform pipeline.
 *
 * This module contains custom error types for the different stages of the
 * pipeline, using the thiserror crate for ergonomic error definitions.
 * Provider failures carry a `kind` so that retry decisions are a pure
 * function of the error value.
 */

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::store::JobStatus;

/// Classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Upstream asked us to slow down (HTTP 429 or quota errors)
    RateLimited,
    /// Temporary failure such as a timeout, a dropped connection or a 5xx
    Transient,
    /// Non-retryable failure: bad credentials, unknown model, bad request
    Fatal,
    /// The provider answered, but the answer is unusable
    InvalidResponse,
}

impl ProviderErrorKind {
    /// Whether a call failing with this kind may be retried
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient)
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate limited"),
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
            Self::InvalidResponse => write!(f, "invalid response"),
        }
    }
}

/// Error returned by a translation provider call
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} provider error: {message}")]
pub struct ProviderError {
    /// What kind of failure this is
    pub kind: ProviderErrorKind,
    /// Human readable detail
    pub message: String,
    /// Minimum wait requested by the provider (e.g. a `Retry-After` header)
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    /// Create a new provider error of the given kind
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Fatal, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidResponse, message)
    }

    /// Attach a provider-requested minimum wait
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Errors produced by the retry controller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetryError {
    /// Non-retryable provider error, propagated on first occurrence
    #[error(transparent)]
    Provider(ProviderError),

    /// Every attempt failed with a retryable error
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of calls made
        attempts: u32,
        /// Error returned by the final call
        last_error: ProviderError,
    },
}

impl RetryError {
    /// The underlying provider error
    pub fn provider_error(&self) -> &ProviderError {
        match self {
            Self::Provider(e) => e,
            Self::RetriesExhausted { last_error, .. } => last_error,
        }
    }

    /// Whether the pipeline should substitute a placeholder and carry on.
    ///
    /// Only `Fatal` errors abort a job run.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::RetriesExhausted { .. } => true,
            Self::Provider(e) => e.kind != ProviderErrorKind::Fatal,
        }
    }
}

/// Errors from the chunk splitter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    #[error("Maximum unit size must be greater than zero")]
    InvalidMaxSize,
}

/// Errors raised by a chunk store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The job does not exist
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The document does not exist
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// A status change that the job lifecycle does not allow
    #[error("Invalid job status transition for {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// Backend failure (SQLite, I/O, lock poisoning, ...)
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Backend(error.to_string())
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<StoreError>() {
            Ok(store_error) => store_error,
            Err(error) => Self::Backend(format!("{:#}", error)),
        }
    }
}

/// Errors that end a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid chunking parameters
    #[error("Split error: {0}")]
    Split(#[from] SplitError),

    /// A fatal provider error aborted the run
    #[error("Provider error: {0}")]
    Provider(ProviderError),

    /// Persistence failed; previously committed chunks are intact
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The job's records were produced by a different chunk plan
    #[error("Job {job_id} was chunked differently; rerun with its original chunking settings or start a new job")]
    PlanMismatch { job_id: String },

    /// Reassembly was requested before every chunk was persisted
    #[error("Job {job_id} is incomplete: {missing} of {total} chunks missing")]
    Incomplete {
        job_id: String,
        missing: usize,
        total: usize,
    },
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from configuration loading or validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from the pipeline
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
