use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::models::chat::utc_timestamp;
use crate::services::conversation::{CacheStats, ConversationManager};
use crate::services::index::IndexStatus;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
}

pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: utc_timestamp(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    status: String,
    index: IndexStatus,
    sessions: CacheStats,
    timestamp: String,
}

/// 200 once the retrieval index is usable, 503 before that
pub async fn readiness_check(
    State(manager): State<Arc<ConversationManager>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let index = manager.index_status();
    let (code, status) = if index.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (
        code,
        Json(ReadinessResponse {
            status: status.to_string(),
            index,
            sessions: manager.cache_stats(),
            timestamp: utc_timestamp(),
        }),
    )
}

#[derive(Serialize)]
pub struct ReloadResponse {
    index: IndexStatus,
    timestamp: String,
}

/// Reconnect the retrieval index without waiting out a cached failure
pub async fn reload_index(
    State(manager): State<Arc<ConversationManager>>,
) -> (StatusCode, Json<ReloadResponse>) {
    let index = manager.reload_index().await;
    let code = if index.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(ReloadResponse {
            index,
            timestamp: utc_timestamp(),
        }),
    )
}
