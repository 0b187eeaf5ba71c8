/*!
 * Provider adapter tests against a mock HTTP server
 */

use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::time::Duration;

use longform::app_config::TranslationProvider;
use longform::errors::ProviderErrorKind;
use longform::providers::{Provider, ProviderClient};

use crate::common;

fn client_for(provider: TranslationProvider, server: &ServerGuard) -> ProviderClient {
    let dir = common::create_temp_dir().unwrap();
    let config = common::test_config(provider, &server.url(), &dir.path().join("jobs.db"));
    ProviderClient::from_config(&config).unwrap()
}

fn openai_reply(content: &str, finish_reason: &str) -> String {
    json!({
        "choices": [{"message": {"role": "assistant", "content": content}, "finish_reason": finish_reason}]
    })
    .to_string()
}

#[tokio::test]
async fn test_openai_translate_shouldSendChatRequestAndReturnContent() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({"model": "gpt-4o-mini"})),
            Matcher::Regex(r#""role":"system","content":"[^"]*English[^"]*Korean"#.to_string()),
            Matcher::Regex(r"Earlier sentence\.".to_string()),
            Matcher::Regex(r#"Text to translate:\\nHello, world""#.to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(openai_reply("안녕하세요, 세상", "stop"))
        .expect(1)
        .create_async()
        .await;
    let client = client_for(TranslationProvider::OpenAI, &server);

    let translated = client
        .translate("Hello, world", Some("Earlier sentence."))
        .await
        .unwrap();
    assert_eq!(translated, "안녕하세요, 세상");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_openai_translate_with429_shouldReportRateLimitWithRetryAfter() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_header("retry-after", "7")
        .with_body(r#"{"error":{"message":"slow down"}}"#)
        .create_async()
        .await;
    let client = client_for(TranslationProvider::OpenAI, &server);

    let error = client.translate("Hello", None).await.unwrap_err();
    assert_eq!(error.kind, ProviderErrorKind::RateLimited);
    assert_eq!(error.retry_after, Some(Duration::from_secs(7)));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_openai_translate_withServerError_shouldBeTransient() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(503)
        .with_body(r#"{"error":"overloaded"}"#)
        .create_async()
        .await;
    let client = client_for(TranslationProvider::OpenAI, &server);

    let error = client.translate("Hello", None).await.unwrap_err();
    assert_eq!(error.kind, ProviderErrorKind::Transient);
    assert_eq!(error.retry_after, None);
}

#[tokio::test]
async fn test_openai_translate_withUnauthorized_shouldBeFatal() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(401)
        .with_body(r#"{"error":"invalid api key"}"#)
        .create_async()
        .await;
    let client = client_for(TranslationProvider::OpenAI, &server);

    let error = client.translate("Hello", None).await.unwrap_err();
    assert_eq!(error.kind, ProviderErrorKind::Fatal);
    assert!(!error.is_retryable());
    assert!(error.message.contains("401"));
}

#[tokio::test]
async fn test_openai_translate_withEmptyContent_shouldBeInvalidResponse() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(openai_reply("   ", "stop"))
        .create_async()
        .await;
    let client = client_for(TranslationProvider::OpenAI, &server);

    let error = client.translate("Hello", None).await.unwrap_err();
    assert_eq!(error.kind, ProviderErrorKind::InvalidResponse);
}

#[tokio::test]
async fn test_openai_translate_withUndecodableBody_shouldBeInvalidResponse() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html>gateway</html>")
        .create_async()
        .await;
    let client = client_for(TranslationProvider::OpenAI, &server);

    let error = client.translate("Hello", None).await.unwrap_err();
    assert_eq!(error.kind, ProviderErrorKind::InvalidResponse);
}

#[tokio::test]
async fn test_openai_translate_withLengthFinish_shouldRejectTruncatedText() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(openai_reply("안녕하세요, 세", "length"))
        .create_async()
        .await;
    let client = client_for(TranslationProvider::OpenAI, &server);

    let error = client.translate("Hello, world", None).await.unwrap_err();
    assert_eq!(error.kind, ProviderErrorKind::InvalidResponse);
    assert!(error.message.contains("truncated"));
}

#[tokio::test]
async fn test_openai_validate_shouldAskForJsonVerdict() {
    let mut server = Server::new_async().await;
    let verdict = json!({"isValid": false, "score": 60, "issues": ["drops the greeting"], "suggestions": []});
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({"response_format": {"type": "json_object"}})),
            Matcher::Regex(r"Original:\\nHello, world".to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(openai_reply(&verdict.to_string(), "stop"))
        .expect(1)
        .create_async()
        .await;
    let client = client_for(TranslationProvider::OpenAI, &server);

    let validation = client.validate("Hello, world", "세상").await.unwrap();
    assert!(!validation.is_valid);
    assert!((validation.score - 0.6).abs() < 1e-6);
    assert_eq!(validation.issues, vec!["drops the greeting".to_string()]);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_openai_validate_withProseReply_shouldBeInvalidResponse() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(openai_reply("Looks fine.", "stop"))
        .create_async()
        .await;
    let client = client_for(TranslationProvider::OpenAI, &server);

    let error = client.validate("Hello", "안녕").await.unwrap_err();
    assert_eq!(error.kind, ProviderErrorKind::InvalidResponse);
}

#[tokio::test]
async fn test_deepl_validate_shouldCompareLengthsWithoutRequest() {
    let mut server = Server::new_async().await;
    let mock = server.mock("POST", Matcher::Any).expect(0).create_async().await;
    let client = client_for(TranslationProvider::DeepL, &server);

    let validation = client.validate("Hello, world", "").await.unwrap();
    assert!(!validation.is_valid);
    assert_eq!(validation.score, 0.0);

    let validation = client.validate("Hello, world", "안녕하세요, 세상").await.unwrap();
    assert!(validation.is_valid);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_ollama_translate_shouldUseGenerateApi() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/generate")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({
                "model": "llama3.2:3b",
                "stream": false,
                "prompt": "A translated sentence"
            })),
            Matcher::Regex(r#""system":"[^"]*Korean"#.to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"model":"llama3.2:3b","response":"번역된 문장","done":true}"#)
        .expect(1)
        .create_async()
        .await;
    let client = client_for(TranslationProvider::Ollama, &server);

    let translated = client.translate("A translated sentence", None).await.unwrap();
    assert_eq!(translated, "번역된 문장");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_ollama_translate_withLengthDoneReason_shouldRejectTruncatedText() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"model":"llama3.2:3b","response":"번역된","done":true,"done_reason":"length"}"#)
        .create_async()
        .await;
    let client = client_for(TranslationProvider::Ollama, &server);

    let error = client.translate("A translated sentence", None).await.unwrap_err();
    assert_eq!(error.kind, ProviderErrorKind::InvalidResponse);
}

#[tokio::test]
async fn test_ollama_testConnection_shouldQueryTags() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/tags")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"models":[]}"#)
        .expect(1)
        .create_async()
        .await;
    let client = client_for(TranslationProvider::Ollama, &server);

    client.test_connection().await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_anthropic_translate_shouldSendKeyHeaders() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "test-key")
        .match_header("anthropic-version", Matcher::Any)
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""system":"[^"]*Korean"#.to_string()),
            Matcher::Regex(r#""role":"user""#.to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"content":[{"type":"text","text":"안녕"}],"stop_reason":"end_turn"}"#)
        .expect(1)
        .create_async()
        .await;
    let client = client_for(TranslationProvider::Anthropic, &server);

    assert_eq!(client.translate("Hi", None).await.unwrap(), "안녕");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_anthropic_translate_withMaxTokensStop_shouldRejectTruncatedText() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/messages")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"content":[{"type":"text","text":"안녕하세"}],"stop_reason":"max_tokens"}"#)
        .create_async()
        .await;
    let client = client_for(TranslationProvider::Anthropic, &server);

    let error = client.translate("Hello there", None).await.unwrap_err();
    assert_eq!(error.kind, ProviderErrorKind::InvalidResponse);
}

#[tokio::test]
async fn test_gemini_translate_shouldCallGenerateContentForModel() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/models/gemini-1.5-flash:generateContent")
        .match_header("x-goog-api-key", "test-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"안녕"}]},"finishReason":"STOP"}]}"#)
        .expect(1)
        .create_async()
        .await;
    let client = client_for(TranslationProvider::Gemini, &server);

    assert_eq!(client.translate("Hi", None).await.unwrap(), "안녕");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_gemini_translate_withMaxTokensFinish_shouldRejectTruncatedText() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/models/gemini-1.5-flash:generateContent")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"안녕하"}]},"finishReason":"MAX_TOKENS"}]}"#)
        .create_async()
        .await;
    let client = client_for(TranslationProvider::Gemini, &server);

    let error = client.translate("Hello there", None).await.unwrap_err();
    assert_eq!(error.kind, ProviderErrorKind::InvalidResponse);
}

#[tokio::test]
async fn test_gemini_translate_withoutCandidates_shouldBeInvalidResponse() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/models/gemini-1.5-flash:generateContent")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"candidates":[]}"#)
        .create_async()
        .await;
    let client = client_for(TranslationProvider::Gemini, &server);

    let error = client.translate("Hi", None).await.unwrap_err();
    assert_eq!(error.kind, ProviderErrorKind::InvalidResponse);
}

#[tokio::test]
async fn test_deepl_translate_shouldPassContextNatively() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/translate")
        .match_header("authorization", "DeepL-Auth-Key test-key")
        .match_body(Matcher::PartialJson(json!({
            "text": ["Hi"],
            "target_lang": "KO",
            "source_lang": "EN",
            "context": "Before."
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"translations":[{"detected_source_language":"EN","text":"안녕"}]}"#)
        .expect(1)
        .create_async()
        .await;
    let client = client_for(TranslationProvider::DeepL, &server);

    assert_eq!(client.translate("Hi", Some("Before.")).await.unwrap(), "안녕");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_translate_withUnreachableEndpoint_shouldBeTransient() {
    // Bind then drop a listener so the port is very likely closed
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let dir = common::create_temp_dir().unwrap();
    let config = common::test_config(
        TranslationProvider::Ollama,
        &format!("http://{}", address),
        &dir.path().join("jobs.db"),
    );
    let client = ProviderClient::from_config(&config).unwrap();

    let error = client.translate("Hello", None).await.unwrap_err();
    assert_eq!(error.kind, ProviderErrorKind::Transient);
}
