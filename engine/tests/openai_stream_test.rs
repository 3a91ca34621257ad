//! Integration tests for the OpenAI-compatible streaming client
//!
//! Serves server-sent events from a mock server and checks chunk decoding,
//! error mapping and a full orchestrated turn over HTTP.

use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use chatstream_engine::chat::{ConversationConfig, Message, Model, Role};
use chatstream_engine::db::{ChatStore, InMemoryChatStore};
use chatstream_engine::llm::openai::OpenAIProvider;
use chatstream_engine::llm::tokens::{HeuristicTokenCounter, TiktokenCounter};
use chatstream_engine::llm::{LLMError, ModelClient};
use chatstream_engine::orchestrator::CompletionOrchestrator;
use sdk::errors::{EngineError, ErrorKind};
use sdk::types::{TurnConfigInput, TurnInput};

fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::new();
    for delta in deltas {
        let event = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "choices": [{ "index": 0, "delta": { "content": delta }, "finish_reason": null }]
        });
        body.push_str(&format!("data: {}\n\n", event));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

fn provider(server: &MockServer) -> OpenAIProvider {
    OpenAIProvider::new(
        server.uri(),
        Some("test-key".to_string()),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn conversation() -> (Vec<Message>, ConversationConfig) {
    let counter = HeuristicTokenCounter::new();
    let model = Model::new("gpt-4o-mini", 4096).unwrap();
    let messages = vec![
        Message::new(Role::System, "You are helpful", &model, &counter).unwrap(),
        Message::new(Role::User, "Say hello", &model, &counter).unwrap(),
    ];
    (messages, ConversationConfig::new(model))
}

async fn collect(provider: &OpenAIProvider) -> Result<Vec<String>, LLMError> {
    let (messages, config) = conversation();
    let mut stream = provider.stream_completion(&messages, &config).await?;
    let mut deltas = Vec::new();
    while let Some(chunk) = stream.next().await {
        deltas.push(chunk?.delta);
    }
    Ok(deltas)
}

#[tokio::test]
async fn test_streams_deltas_until_done() {
    let server = MockServer::start().await;
    let mut body = sse_body(&["Hel", "lo", " world"]);
    // Anything after [DONE] is ignored
    body.push_str("data: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\n");

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "stream": true,
            "messages": [
                { "role": "system", "content": "You are helpful" },
                { "role": "user", "content": "Say hello" }
            ]
        })))
        .respond_with(sse_response(body))
        .expect(1)
        .mount(&server)
        .await;

    let deltas = collect(&provider(&server)).await.unwrap();
    assert_eq!(deltas, vec!["Hel", "lo", " world"]);
}

#[tokio::test]
async fn test_stream_without_done_ends_at_eof() {
    let server = MockServer::start().await;
    let body = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
                : keep-alive\n\n\
                data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}";

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(body.to_string()))
        .mount(&server)
        .await;

    let deltas: Vec<String> = collect(&provider(&server))
        .await
        .unwrap()
        .into_iter()
        .filter(|d| !d.is_empty())
        .collect();
    assert_eq!(deltas, vec!["Hi"]);
}

#[tokio::test]
async fn test_unauthorized_maps_to_authentication_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let err = collect(&provider(&server)).await.unwrap_err();
    assert!(matches!(err, LLMError::AuthenticationFailed(ref text) if text == "bad key"));
}

#[tokio::test]
async fn test_too_many_requests_maps_to_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = collect(&provider(&server)).await.unwrap_err();
    assert!(matches!(err, LLMError::RateLimitExceeded));
}

#[tokio::test]
async fn test_server_error_maps_to_invalid_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = collect(&provider(&server)).await.unwrap_err();
    match err {
        LLMError::InvalidRequest(text) => {
            assert!(text.contains("500"));
            assert!(text.contains("boom"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_error_event_ends_stream() {
    let server = MockServer::start().await;
    let body = format!(
        "{}data: {}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        json!({ "error": { "message": "context length exceeded" } })
    );
    Mock::given(method("POST"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let (messages, config) = conversation();
    let mut stream = provider(&server)
        .stream_completion(&messages, &config)
        .await
        .unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap().delta, "Hel");
    assert!(matches!(
        stream.next().await.unwrap(),
        Err(LLMError::InvalidRequest(_))
    ));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_connection_refused_maps_to_provider_unavailable() {
    // Bind then release a port so nothing is listening on it
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let provider =
        OpenAIProvider::new(format!("http://{}", addr), None, Duration::from_secs(5)).unwrap();

    let err = collect(&provider).await.unwrap_err();
    assert!(matches!(err, LLMError::ProviderUnavailable(_)));
    assert_eq!(EngineError::from(err).kind(), ErrorKind::Upstream);
}

#[tokio::test]
async fn test_orchestrated_turn_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(sse_body(&["Hel", "lo"])))
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryChatStore::new());
    let orchestrator = Arc::new(CompletionOrchestrator::new(
        store.clone(),
        Arc::new(provider(&server)),
        Arc::new(TiktokenCounter::new()),
    ));

    let input = TurnInput::new("c-1", "user-1", "Say hello").with_config(TurnConfigInput::new(
        "gpt-4o-mini",
        4096,
        "You are helpful",
    ));
    let mut handle = orchestrator.start(input, CancellationToken::new());

    let mut snapshots = Vec::new();
    while let Some(snapshot) = handle.recv().await {
        snapshots.push(snapshot.content);
    }
    let output = handle.finish().await.unwrap();

    assert_eq!(snapshots, vec!["Hel", "Hello"]);
    assert_eq!(output.content, "Hello");

    let chat = store.find_chat_by_id("c-1").await.unwrap();
    let last = chat.active_messages().last().unwrap();
    assert_eq!(last.role(), Role::Assistant);
    assert_eq!(last.content(), "Hello");
    // Counted with the model's BPE table
    assert_eq!(last.tokens(), 1);
}
