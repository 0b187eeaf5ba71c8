/*!
 * Pipeline tests over the SQLite store: crash recovery, backoff, pacing
 */

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use longform::database::Repository;
use longform::errors::{PipelineError, ProviderError, ProviderErrorKind};
use longform::providers::mock::{MockOutcome, MockProvider};
use longform::store::{ChunkStore, DocumentSource, JobStatus, MemoryChunkStore, NewJob};
use longform::translation::{Document, JobRequest, PipelineConfig, PipelineOrchestrator, RetryPolicy};

use crate::common::{self, sample_text};

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        max_unit_size: 20,
        retry_policy: RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(5),
        },
        min_call_interval: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

fn expected_output(provider: &MockProvider, count: usize) -> String {
    (0..count)
        .map(|i| provider.transform(&format!("Part {} {}", i, common::SENTENCE)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

async fn new_job(repository: &Repository, document: &Document) -> String {
    common::init_logging();
    repository.insert_document(document).await.unwrap();
    repository
        .create_job(NewJob::new(&document.id, "mock", "mock-model", "ko"))
        .await
        .unwrap()
        .id
}

/// A fatal error after three chunks, then a restart on a fresh connection
#[tokio::test]
async fn test_run_afterFatalErrorAndReopen_shouldOnlyTranslateRemainingChunks() {
    let dir = common::create_temp_dir().unwrap();
    let db_path = dir.path().join("jobs.db");
    let document = Document::from_text(sample_text(5));

    let job_id = {
        let repository = Repository::open(&db_path).unwrap();
        let job_id = new_job(&repository, &document).await;

        let provider = MockProvider::working()
            .fail_when_contains("Part 3", ProviderError::fatal("401 unauthorized"));
        let orchestrator = PipelineOrchestrator::new(&provider, &repository, fast_config());
        let result = orchestrator.run(&job_id, &document, &CancellationToken::new()).await;

        assert!(matches!(result, Err(PipelineError::Provider(ref e)) if e.kind == ProviderErrorKind::Fatal));
        assert_eq!(repository.list_chunks(&job_id).await.unwrap().len(), 3);
        assert_eq!(repository.get_job_status(&job_id).await.unwrap(), JobStatus::Error);
        job_id
    };

    let repository = Repository::open(&db_path).unwrap();
    let fingerprint = fast_config().plan_fingerprint(&document).unwrap();
    let resumable = repository
        .find_resumable_job(&document.id, "mock", "mock-model", "ko", &fingerprint)
        .await
        .unwrap()
        .expect("the failed job is resumable");
    assert_eq!(resumable.id, job_id);
    assert_eq!(resumable.total_chunks, Some(5));

    let stored = repository.get_document(&document.id).await.unwrap();
    assert_eq!(stored.raw_text, document.raw_text);

    let provider = MockProvider::working();
    let orchestrator = PipelineOrchestrator::new(&provider, &repository, fast_config());
    let outcome = orchestrator
        .run(&job_id, &stored, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(provider.call_count(), 2);
    assert!(provider.call_texts()[0].starts_with("Part 3"));
    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.skipped_chunks, 3);
    assert_eq!(outcome.translated_chunks, 2);

    let output = orchestrator.reassemble(&job_id, &stored).await.unwrap();
    assert_eq!(output, expected_output(&provider, 5));
}

/// A run killed mid-flight leaves the job in `translating`; the next run picks it up
#[tokio::test]
async fn test_run_afterAbortedTask_shouldResumeFromPersistedChunks() {
    let dir = common::create_temp_dir().unwrap();
    let db_path = dir.path().join("jobs.db");
    let document = Document::from_text(sample_text(5));

    let repository = Repository::open(&db_path).unwrap();
    let job_id = new_job(&repository, &document).await;

    let slow = MockProvider::working().with_delay(Duration::from_millis(40));
    let task = {
        let provider = slow.clone();
        let store = repository.clone();
        let job_id = job_id.clone();
        let document = document.clone();
        tokio::spawn(async move {
            let orchestrator = PipelineOrchestrator::new(&provider, &store, fast_config());
            orchestrator.run(&job_id, &document, &CancellationToken::new()).await
        })
    };

    let mut waited = 0;
    while repository.list_chunks(&job_id).await.unwrap().len() < 3 {
        assert!(waited < 400, "pipeline made no progress");
        tokio::time::sleep(Duration::from_millis(5)).await;
        waited += 1;
    }
    task.abort();
    let _ = task.await;
    // Let a write already handed to the blocking pool land
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(repository);

    let repository = Repository::open(&db_path).unwrap();
    let persisted = repository.list_chunks(&job_id).await.unwrap().len();
    assert!((3..5).contains(&persisted));
    assert_eq!(repository.get_job_status(&job_id).await.unwrap(), JobStatus::Translating);

    let provider = MockProvider::working();
    let orchestrator = PipelineOrchestrator::new(&provider, &repository, fast_config());
    let outcome = orchestrator
        .run(&job_id, &document, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(provider.call_count(), 5 - persisted);
    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(
        orchestrator.reassemble(&job_id, &document).await.unwrap(),
        expected_output(&provider, 5)
    );
}

/// Exhausted retries persist a visible placeholder and the job still completes
#[tokio::test]
async fn test_run_withPersistentTransientErrors_shouldStorePlaceholderInDatabase() {
    let repository = Repository::new_in_memory().unwrap();
    let document = Document::from_text(sample_text(3));
    let job_id = new_job(&repository, &document).await;

    let provider =
        MockProvider::working().fail_when_contains("Part 1", ProviderError::transient("timeout"));
    let orchestrator = PipelineOrchestrator::new(&provider, &repository, fast_config());
    let outcome = orchestrator
        .run(&job_id, &document, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.placeholder_chunks, 1);
    // Two attempts for the failing chunk, one for each other chunk
    assert_eq!(provider.call_count(), 4);

    let records = repository.get_chunks(&job_id).await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(records[1].has_placeholder);
    assert!(records[1].translated_text.starts_with("[UNTRANSLATED 1.0]\nPart 1"));
    assert!(!records[0].has_placeholder && !records[2].has_placeholder);
}

/// Two rate-limit answers back off 1000ms then 2000ms before the third call
#[tokio::test(start_paused = true)]
async fn test_run_withRateLimitedProvider_shouldBackOffExponentially() {
    let store = MemoryChunkStore::new();
    let document = Document::from_text("A single short paragraph.");
    store.insert_document(document.clone());
    let job_id = store
        .create_job(NewJob::new(&document.id, "mock", "mock-model", "ko"))
        .await
        .unwrap()
        .id;

    let provider = MockProvider::working().with_script([
        MockOutcome::Fail(ProviderError::rate_limited("429")),
        MockOutcome::Fail(ProviderError::rate_limited("429")),
        MockOutcome::Translate,
    ]);
    let config = PipelineConfig {
        retry_policy: RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
        },
        min_call_interval: Duration::ZERO,
        ..PipelineConfig::default()
    };
    let orchestrator = PipelineOrchestrator::new(&provider, &store, config);
    let outcome = orchestrator
        .run(&job_id, &document, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.placeholder_chunks, 0);
    let calls = provider.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1].at - calls[0].at, Duration::from_millis(1000));
    assert_eq!(calls[2].at - calls[1].at, Duration::from_millis(2000));
}

/// Consecutive calls of a job are spaced by the minimum call interval
#[tokio::test(start_paused = true)]
async fn test_run_withMinCallInterval_shouldPaceCalls() {
    let store = MemoryChunkStore::new();
    let document = Document::from_text(sample_text(3));
    store.insert_document(document.clone());
    let job_id = store
        .create_job(NewJob::new(&document.id, "mock", "mock-model", "ko"))
        .await
        .unwrap()
        .id;

    let provider = MockProvider::working();
    let config = PipelineConfig {
        min_call_interval: Duration::from_millis(500),
        ..fast_config()
    };
    PipelineOrchestrator::new(&provider, &store, config)
        .run(&job_id, &document, &CancellationToken::new())
        .await
        .unwrap();

    let calls = provider.calls();
    assert_eq!(calls.len(), 3);
    for pair in calls.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(500));
    }
}

/// Several jobs in one database, run concurrently
#[tokio::test]
async fn test_runJobs_overRepository_shouldCompleteEveryJob() {
    let repository = Repository::new_in_memory().unwrap();
    let first = Document::from_text(sample_text(2));
    let second = Document::from_text(format!("{}\n\nEpilogue.", sample_text(3)));
    let jobs = vec![
        JobRequest {
            job_id: new_job(&repository, &first).await,
            document: first.clone(),
        },
        JobRequest {
            job_id: new_job(&repository, &second).await,
            document: second.clone(),
        },
    ];

    let provider = MockProvider::working();
    let orchestrator = PipelineOrchestrator::new(&provider, &repository, fast_config());
    let results = orchestrator.run_jobs(&jobs, &CancellationToken::new()).await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, jobs[0].job_id);
    assert_eq!(results[1].0, jobs[1].job_id);
    for (job_id, result) in &results {
        assert_eq!(result.as_ref().unwrap().status, JobStatus::Completed);
        assert_eq!(repository.get_job_status(job_id).await.unwrap(), JobStatus::Completed);
    }
    // The epilogue packs into the third chunk of the second document
    assert_eq!(provider.call_count(), 2 + 3);

    let listed = repository.list_jobs(10).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|job| job.status == JobStatus::Completed));
}
