use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use rag_chat_server::config::PromptsConfig;
use rag_chat_server::handlers::build_router;
use rag_chat_server::models::chat::ChatMessage;
use rag_chat_server::services::conversation::{
    ContextBuilder, ConversationCache, ConversationManager, LlmProvider, ManagerConfig,
    MemoryLimits, Passage, RetrievalProvider,
};
use rag_chat_server::services::{IndexConnector, IndexManager};
use rag_chat_server::state::AppState;

struct FixedRetriever;

#[async_trait::async_trait]
impl RetrievalProvider for FixedRetriever {
    async fn retrieve(&self, _query: &str, _k: usize) -> Result<Vec<Passage>> {
        Ok(vec![Passage::new("Applications close on 30 June.", 0.9)])
    }
}

struct TestConnector {
    available: AtomicBool,
}

impl TestConnector {
    fn new(available: bool) -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(available),
        })
    }
}

#[async_trait::async_trait]
impl IndexConnector for TestConnector {
    async fn connect(&self) -> Result<Arc<dyn RetrievalProvider>> {
        if self.available.load(Ordering::SeqCst) {
            Ok(Arc::new(FixedRetriever))
        } else {
            anyhow::bail!("collection not found")
        }
    }
}

/// Echoes the last prompt's question back, or fails on demand
struct EchoLlm {
    fail: bool,
}

#[async_trait::async_trait]
impl LlmProvider for EchoLlm {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        if self.fail {
            anyhow::bail!("upstream 500: internal details");
        }
        let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        let question = prompt.rsplit("Question: ").next().unwrap_or_default();
        Ok(format!("answer to {}", question))
    }
}

fn app(index_available: bool, llm_fails: bool) -> Router {
    app_with(TestConnector::new(index_available), llm_fails)
}

fn app_with(connector: Arc<TestConnector>, llm_fails: bool) -> Router {
    let index = Arc::new(IndexManager::new(connector, Duration::from_secs(30)));
    let manager = Arc::new(ConversationManager::new(
        ConversationCache::new(MemoryLimits::default(), 100, Duration::from_secs(3600)),
        ContextBuilder::new(PromptsConfig::default(), 3),
        index,
        Arc::new(EchoLlm { fail: llm_fails }),
        ManagerConfig::default(),
    ));
    build_router(AppState::new(manager, 50))
}

fn post_chat(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn chat_returns_reply_with_new_session() {
    let app = app(true, false);
    let (status, body) = send(&app, post_chat(json!({"message": "hello"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "answer to hello");
    assert!(!body["session_id"].as_str().unwrap().is_empty());
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn chat_history_round_trip() {
    let app = app(true, false);
    let (_, first) = send(
        &app,
        post_chat(json!({"message": "first", "session_id": "abc"})),
    )
    .await;
    assert_eq!(first["session_id"], "abc");
    send(&app, post_chat(json!({"message": "second", "session_id": "abc"}))).await;

    let (status, body) = send(&app, get("/chat/history/abc")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "abc");

    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["user_message"], "first");
    assert_eq!(messages[0]["bot_response"], "answer to first");
    assert_eq!(messages[1]["user_message"], "second");
}

#[tokio::test]
async fn unknown_session_history_is_404() {
    let app = app(true, false);
    let (status, body) = send(&app, get("/chat/history/nobody")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn invalid_input_is_400() {
    let app = app(true, false);

    let (status, body) = send(&app, post_chat(json!({"message": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadRequest");

    let long = "x".repeat(51);
    let (status, _) = send(&app, post_chat(json!({"message": long}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        post_chat(json!({"message": "hi", "session_id": "bad\u{0007}id"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_json_is_client_error() {
    let app = app(true, false);
    let request = Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, _) = send(&app, request).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn generation_failure_is_generic_500() {
    let app = app(true, true);
    let (status, body) = send(&app, post_chat(json!({"message": "hello"}))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Error processing chat");
    assert!(!body.to_string().contains("internal details"));
}

#[tokio::test]
async fn unavailable_index_still_answers_200() {
    let app = app(false, true);
    let (status, body) = send(
        &app,
        post_chat(json!({"message": "hello", "session_id": "s1"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["response"],
        "Vector index not available. Please check the server logs."
    );
    assert_eq!(body["session_id"], "s1");
}

#[tokio::test]
async fn health_and_readiness() {
    let app = app(true, false);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());

    let (status, body) = send(&app, get("/health/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["index"]["state"], "uninitialized");

    send(&app, post_chat(json!({"message": "hello"}))).await;

    let (status, body) = send(&app, get("/health/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["index"]["state"], "ready");
    assert_eq!(body["sessions"]["active_sessions"], 1);
    assert_eq!(body["sessions"]["stored_turns"], 2);
    assert_eq!(body["sessions"]["total_turns"], 2);
    assert_eq!(body["sessions"]["evicted_turns"], 0);
}

#[tokio::test]
async fn index_reload_recovers_from_cached_failure() {
    let connector = TestConnector::new(false);
    let app = app_with(connector.clone(), false);

    let (_, body) = send(&app, post_chat(json!({"message": "hello"}))).await;
    assert_eq!(
        body["response"],
        "Vector index not available. Please check the server logs."
    );

    // Backend comes back, but the failure stays cached for the retry window
    connector.available.store(true, Ordering::SeqCst);
    let (status, body) = send(&app, get("/health/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["index"]["state"], "failed");

    let (status, body) = send(&app, post_empty("/admin/index/reload")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["index"]["state"], "ready");

    let (_, body) = send(&app, post_chat(json!({"message": "hello"}))).await;
    assert_eq!(body["response"], "answer to hello");
}

#[tokio::test]
async fn index_reload_reports_unavailable_backend() {
    let app = app(false, false);
    let (status, body) = send(&app, post_empty("/admin/index/reload")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["index"]["state"], "failed");
    assert_eq!(body["index"]["error"], "collection not found");
}
