//! Contract tests for the Ollama-style chat generator against a mock server

use std::time::Duration;

use docqa::config::GeneratorSettings;
use docqa::error::{LlmError, ServiceError};
use docqa::generator::{Generator, OllamaGenerator};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings_for(server: &MockServer) -> GeneratorSettings {
    GeneratorSettings {
        base_url: server.uri(),
        model: "llama3.2".to_string(),
        timeout_secs: 5,
        expansion_timeout_secs: 2,
    }
}

#[tokio::test]
async fn test_chat_sends_contract_and_returns_content() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "llama3.2",
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {
                "role": "assistant",
                "content": "The capital of France is Paris. [P1]"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let generator = OllamaGenerator::new(settings_for(&server)).unwrap();
    let answer = generator
        .chat("system prompt", "What is the capital of France?", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(answer, "The capital of France is Paris. [P1]");
}

#[tokio::test]
async fn test_chat_sends_system_and_user_messages() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "messages": [
                {"role": "system", "content": "ground rules"},
                {"role": "user", "content": "the question"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"role": "assistant", "content": "ok"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let generator = OllamaGenerator::new(settings_for(&server)).unwrap();
    let answer = generator
        .chat("ground rules", "the question", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(answer, "ok");
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model exploded"))
        .mount(&server)
        .await;

    let generator = OllamaGenerator::new(settings_for(&server)).unwrap();
    let err = generator
        .chat("s", "u", Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Llm(LlmError::GenerationFailed(_))
    ));
}

#[tokio::test]
async fn test_malformed_body_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let generator = OllamaGenerator::new(settings_for(&server)).unwrap();
    let err = generator
        .chat("s", "u", Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Llm(LlmError::InvalidResponse(_))
    ));
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(10))
                .set_body_json(json!({
                    "message": {"role": "assistant", "content": "too late"}
                })),
        )
        .mount(&server)
        .await;

    let generator = OllamaGenerator::new(settings_for(&server)).unwrap();
    let err = generator
        .chat("s", "u", Duration::from_millis(200))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Llm(LlmError::Timeout)));
}
