use crate::models::chat::{validate_session_id, ChatHistory, ChatReply, ChatRequest};
use crate::services::conversation::ConversationManager;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    let start_time = Instant::now();

    request.validate(state.max_message_chars)?;

    info!(
        "Chat request: session={}, message_len={}",
        request.session_id.as_deref().unwrap_or("<new>"),
        request.message.len()
    );

    let reply = state
        .conversation_manager
        .chat(&request.message, request.session_id)
        .await?;

    info!(
        "Chat completed: session={}, elapsed={}ms",
        reply.session_id,
        start_time.elapsed().as_millis()
    );

    Ok(Json(reply))
}

pub async fn history_handler(
    State(manager): State<Arc<ConversationManager>>,
    Path(session_id): Path<String>,
) -> Result<Json<ChatHistory>, ApiError> {
    validate_session_id(&session_id)?;

    manager
        .history(&session_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Session {} not found", session_id)))
}
