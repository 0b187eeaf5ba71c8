/*!
 * End-to-end tests of the application controller
 */

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;
use std::fs;
use tokio_util::sync::CancellationToken;

use longform::app_config::{OutputFormat, TranslationProvider};
use longform::app_controller::{Controller, TranslateRequest};
use longform::store::JobStatus;

use crate::common::{self, sample_text, SENTENCE};

/// Matches a generate request whose text to translate starts with `Part <index> `
fn part(index: usize) -> Matcher {
    Matcher::Regex(format!(r#""prompt":"(?:[^"]*Text to translate:\\n)?Part {} "#, index))
}

async fn tags(server: &mut ServerGuard, hits: usize) -> Mock {
    server
        .mock("GET", "/api/tags")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"models":[]}"#)
        .expect(hits)
        .create_async()
        .await
}

async fn generate(server: &mut ServerGuard, matcher: Matcher, status: usize, body: String, hits: usize) -> Mock {
    server
        .mock("POST", "/api/generate")
        .match_body(matcher)
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(body)
        .expect(hits)
        .create_async()
        .await
}

fn ollama_ok(text: &str) -> String {
    json!({"model": "m", "response": text, "done": true}).to_string()
}

fn request(input: &std::path::Path) -> TranslateRequest {
    TranslateRequest {
        input: input.to_path_buf(),
        output: None,
        force_overwrite: false,
        dry_run: false,
    }
}

/// Test a dry run writes the output without touching the database
#[tokio::test]
async fn test_translateFile_dryRun_shouldWriteOutputWithoutDatabase() {
    let dir = common::create_temp_dir().unwrap();
    let db_path = dir.path().join("jobs.db");
    let input = common::create_test_file(dir.path(), "book.txt", &sample_text(3)).unwrap();
    let config = common::test_config(TranslationProvider::Ollama, "http://127.0.0.1:9", &db_path);
    let controller = Controller::with_config(config).unwrap();

    let summary = controller
        .translate_file(
            &TranslateRequest {
                dry_run: true,
                ..request(&input)
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .expect("output did not exist");

    let output_path = dir.path().join("book.ko.txt");
    assert_eq!(summary.output_path.as_deref(), Some(output_path.as_path()));
    assert_eq!(summary.outcome.status, JobStatus::Completed);
    assert_eq!(summary.outcome.translated_chunks, 3);

    let output = fs::read_to_string(&output_path).unwrap();
    assert!(output.starts_with("[ko] Part 0"));
    assert_eq!(output.matches("[ko] ").count(), 3);
    assert!(!db_path.exists());
}

/// Test an existing output is left alone without force overwrite
#[tokio::test]
async fn test_translateFile_withExistingOutput_shouldSkip() {
    let dir = common::create_temp_dir().unwrap();
    let input = common::create_test_file(dir.path(), "book.txt", &sample_text(2)).unwrap();
    let existing = common::create_test_file(dir.path(), "book.ko.txt", "already here").unwrap();
    let config =
        common::test_config(TranslationProvider::Ollama, "http://127.0.0.1:9", &dir.path().join("jobs.db"));
    let controller = Controller::with_config(config).unwrap();

    let summary = controller
        .translate_file(
            &TranslateRequest {
                dry_run: true,
                ..request(&input)
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(summary.is_none());
    assert_eq!(fs::read_to_string(&existing).unwrap(), "already here");

    let summary = controller
        .translate_file(
            &TranslateRequest {
                dry_run: true,
                force_overwrite: true,
                ..request(&input)
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(summary.is_some());
    assert_ne!(fs::read_to_string(&existing).unwrap(), "already here");
}

/// Test a missing input file is reported as an error
#[test]
fn test_translateFile_withMissingInput_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    let config =
        common::test_config(TranslationProvider::Ollama, "http://127.0.0.1:9", &dir.path().join("jobs.db"));
    let controller = Controller::with_config(config).unwrap();

    let result = tokio_test::block_on(async {
        controller
            .translate_file(&request(&dir.path().join("missing.txt")), &CancellationToken::new())
            .await
    });
    let error = result.unwrap_err();
    assert!(error.to_string().contains("does not exist"));
}

/// Test a dry run can write source and translation sentence by sentence
#[tokio::test]
async fn test_translateFile_withBilingualFormat_shouldPairSentences() {
    let dir = common::create_temp_dir().unwrap();
    let input = common::create_test_file(dir.path(), "book.txt", &sample_text(3)).unwrap();
    let mut config =
        common::test_config(TranslationProvider::Ollama, "http://127.0.0.1:9", &dir.path().join("jobs.db"));
    config.output_format = OutputFormat::Bilingual;
    let controller = Controller::with_config(config).unwrap();

    controller
        .translate_file(
            &TranslateRequest {
                dry_run: true,
                ..request(&input)
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();

    let output = fs::read_to_string(dir.path().join("book.ko.txt")).unwrap();
    let first = format!("Part 0 {}\n[ko] Part 0 {}", SENTENCE, SENTENCE);
    assert!(output.starts_with(&first));
    assert_eq!(output.matches("\n[ko] Part ").count(), 3);
    assert_eq!(output.split("\n\n").count(), 3);
}

/// Test a full run against an Ollama-compatible server, persisted in SQLite
#[tokio::test]
async fn test_translateFile_withOllamaServer_shouldWriteOutputAndRecordJob() {
    let mut server = Server::new_async().await;
    let tags_mock = tags(&mut server, 1).await;
    let generate_mock = generate(&mut server, Matcher::Any, 200, ollama_ok("번역"), 3).await;

    let dir = common::create_temp_dir().unwrap();
    let db_path = dir.path().join("jobs.db");
    let input = common::create_test_file(dir.path(), "lecture.txt", &sample_text(3)).unwrap();
    let output = dir.path().join("out").join("lecture.txt");
    let config = common::test_config(TranslationProvider::Ollama, &server.url(), &db_path);
    let controller = Controller::with_config(config).unwrap();

    let summary = controller
        .translate_file(
            &TranslateRequest {
                output: Some(output.clone()),
                ..request(&input)
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.outcome.status, JobStatus::Completed);
    assert_eq!(fs::read_to_string(&output).unwrap(), "번역\n\n번역\n\n번역");

    // Connection test plus one call per chunk
    tags_mock.assert_async().await;
    generate_mock.assert_async().await;

    assert!(db_path.exists());
    let jobs = controller.jobs(10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, summary.job_id);
    assert_eq!(jobs[0].provider, "ollama");
    assert_eq!(jobs[0].status, JobStatus::Completed);

    let report = controller.status(&summary.job_id).await.unwrap();
    assert_eq!(report.persisted_chunks, 3);
    assert_eq!(report.placeholder_chunks, 0);
    assert!(report.to_string().contains("Chunks:      3/3"));
}

/// Test a run that fails on a fatal error resumes on the next invocation
#[tokio::test]
async fn test_translateFile_afterFatalError_shouldResumeSameJob() {
    let mut server = Server::new_async().await;
    let tags_mock = tags(&mut server, 2).await;
    let first_mock = generate(&mut server, part(0), 200, ollama_ok("하나"), 1).await;
    let second_mock = generate(&mut server, part(1), 200, ollama_ok("둘"), 1).await;
    let rejected_mock = generate(&mut server, part(2), 401, r#"{"error":"unauthorized"}"#.to_string(), 1).await;
    let third_mock = generate(&mut server, part(2), 200, ollama_ok("셋"), 1).await;

    let dir = common::create_temp_dir().unwrap();
    let db_path = dir.path().join("jobs.db");
    let input = common::create_test_file(dir.path(), "book.txt", &sample_text(3)).unwrap();
    let config = common::test_config(TranslationProvider::Ollama, &server.url(), &db_path);
    let controller = Controller::with_config(config).unwrap();

    let first = controller
        .translate_file(&request(&input), &CancellationToken::new())
        .await;
    assert!(first.is_err());
    let output_path = dir.path().join("book.ko.txt");
    assert!(!output_path.exists());

    let jobs = controller.jobs(10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Error);
    let failed_job = jobs[0].id.clone();

    let summary = controller
        .translate_file(&request(&input), &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.job_id, failed_job);
    assert_eq!(summary.outcome.skipped_chunks, 2);
    assert_eq!(summary.outcome.translated_chunks, 1);
    assert_eq!(fs::read_to_string(&output_path).unwrap(), "하나\n\n둘\n\n셋");
    assert_eq!(controller.jobs(10).await.unwrap().len(), 1);

    tags_mock.assert_async().await;
    first_mock.assert_async().await;
    second_mock.assert_async().await;
    rejected_mock.assert_async().await;
    third_mock.assert_async().await;
}

/// Test a rerun with other chunk settings starts a new job instead of reusing records
#[tokio::test]
async fn test_translateFile_resumedWithOtherChunkSize_shouldStartNewJob() {
    let mut server = Server::new_async().await;
    let _tags = tags(&mut server, 2).await;
    let _first = generate(&mut server, part(0), 200, ollama_ok("하나"), 1).await;
    let _second = generate(&mut server, part(1), 200, ollama_ok("둘"), 1).await;
    let _rejected = generate(&mut server, part(2), 401, r#"{"error":"unauthorized"}"#.to_string(), 1).await;
    let _third = generate(&mut server, part(2), 200, ollama_ok("셋"), 1).await;

    let dir = common::create_temp_dir().unwrap();
    let db_path = dir.path().join("jobs.db");
    let input = common::create_test_file(dir.path(), "book.txt", &sample_text(3)).unwrap();
    let config = common::test_config(TranslationProvider::Ollama, &server.url(), &db_path);

    let controller = Controller::with_config(config.clone()).unwrap();
    assert!(controller
        .translate_file(&request(&input), &CancellationToken::new())
        .await
        .is_err());
    let failed_job = controller.jobs(10).await.unwrap()[0].id.clone();

    // Parts 0 and 1 now share a chunk
    let mut wider = config;
    wider.chunking.max_unit_size = 40;
    let controller = Controller::with_config(wider).unwrap();
    let summary = controller
        .translate_file(&request(&input), &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_ne!(summary.job_id, failed_job);
    assert_eq!(summary.outcome.status, JobStatus::Completed);
    assert_eq!(summary.outcome.total_chunks, 2);
    assert_eq!(summary.outcome.skipped_chunks, 0);
    assert_eq!(
        fs::read_to_string(dir.path().join("book.ko.txt")).unwrap(),
        "하나\n\n셋"
    );

    let jobs = controller.jobs(10).await.unwrap();
    assert_eq!(jobs.len(), 2);
    let old = jobs.iter().find(|job| job.id == failed_job).unwrap();
    assert_eq!(old.status, JobStatus::Error);
    let report = controller.status(&failed_job).await.unwrap();
    assert_eq!(report.persisted_chunks, 2);
}

/// Test transient failures end in a placeholder, not a gap
#[tokio::test]
async fn test_translateFile_withFlakyServer_shouldWritePlaceholder() {
    let mut server = Server::new_async().await;
    let _tags = tags(&mut server, 1).await;
    let _first = generate(&mut server, part(0), 200, ollama_ok("하나"), 1).await;
    let busy = generate(&mut server, part(1), 503, r#"{"error":"busy"}"#.to_string(), 2).await;
    let _third = generate(&mut server, part(2), 200, ollama_ok("셋"), 1).await;

    let dir = common::create_temp_dir().unwrap();
    let input = common::create_test_file(dir.path(), "book.txt", &sample_text(3)).unwrap();
    let config =
        common::test_config(TranslationProvider::Ollama, &server.url(), &dir.path().join("jobs.db"));
    let controller = Controller::with_config(config).unwrap();

    let summary = controller
        .translate_file(&request(&input), &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.outcome.status, JobStatus::Completed);
    assert_eq!(summary.outcome.placeholder_chunks, 1);
    let output = fs::read_to_string(dir.path().join("book.ko.txt")).unwrap();
    assert!(output.starts_with("하나\n\n[UNTRANSLATED 1.0]\nPart 1 "));
    assert!(output.ends_with("\n\n셋"));
    busy.assert_async().await;

    let report = controller.status(&summary.job_id).await.unwrap();
    assert_eq!(report.placeholder_chunks, 1);
}
