//! HTTP contract tests for the Ollama backend against a mock server.

#![cfg(feature = "ollama")]

use billdigest_core::{EmbeddingBackend, Error, GenerationBackend};
use billdigest_inference::OllamaBackend;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> OllamaBackend {
    OllamaBackend::with_config(
        server.uri(),
        "test-embed".to_string(),
        "test-gen".to_string(),
        3,
    )
}

#[tokio::test]
async fn test_embed_batch_preserves_order() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(serde_json::json!({
            "model": "test-embed",
            "input": ["first", "second"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embeddings": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let vectors = backend(&mock_server)
        .embed_texts(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();

    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[0].as_slice(), &[1.0, 0.0, 0.0]);
    assert_eq!(vectors[1].as_slice(), &[0.0, 1.0, 0.0]);
}

#[tokio::test]
async fn test_embed_empty_input_makes_no_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let vectors = backend(&mock_server).embed_texts(&[]).await.unwrap();
    assert!(vectors.is_empty());
}

#[tokio::test]
async fn test_embed_server_error_is_embedding_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&mock_server)
        .await;

    let err = backend(&mock_server)
        .embed_texts(&["text".to_string()])
        .await
        .unwrap_err();

    match err {
        Error::Embedding(msg) => assert!(msg.contains("model not loaded"), "got: {}", msg),
        other => panic!("expected embedding error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_generate_with_system_sends_both_messages() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({
            "model": "test-gen",
            "stream": false,
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "Summarize section 2."}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "test-gen",
            "message": {"role": "assistant", "content": "Section 2 repeals the sunset."},
            "done": true
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let text = backend(&mock_server)
        .generate_with_system("Be terse.", "Summarize section 2.")
        .await
        .unwrap();
    assert_eq!(text, "Section 2 repeals the sunset.");
}

#[tokio::test]
async fn test_generate_server_error_is_inference_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let err = backend(&mock_server).generate("hello").await.unwrap_err();
    assert!(matches!(err, Error::Inference(_)));
}

#[tokio::test]
async fn test_generate_malformed_body_is_inference_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock_server)
        .await;

    let err = backend(&mock_server).generate("hello").await.unwrap_err();
    assert!(matches!(err, Error::Inference(_)));
}
