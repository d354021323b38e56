pub mod chat;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::state::AppState;

/// Request bodies above this size are rejected with 413
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat::chat_handler))
        .route("/chat/history/{session_id}", get(chat::history_handler))
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/admin/index/reload", post(health::reload_index))
        .with_state(state)
        // CORS
        .layer(CorsLayer::permissive())
        // Tracing
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
