use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::services::conversation::TokenCounter;
use crate::utils::error::RagError;

/// Opaque, caller-visible conversation key
pub type SessionId = String;

const MAX_SESSION_ID_CHARS: usize = 128;

pub fn generate_session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string()
}

/// ISO-8601 UTC timestamp used in every reply
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ===== REQUEST MODELS =====

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ChatRequest {
    /// Reject malformed input before it reaches the conversation engine
    pub fn validate(&self, max_message_chars: usize) -> Result<(), RagError> {
        if self.message.trim().is_empty() {
            return Err(RagError::InvalidInput("message must not be empty".to_string()));
        }

        let chars = self.message.chars().count();
        if chars > max_message_chars {
            return Err(RagError::InvalidInput(format!(
                "message is too long ({} characters, max {})",
                chars, max_message_chars
            )));
        }

        if let Some(session_id) = &self.session_id {
            validate_session_id(session_id)?;
        }

        Ok(())
    }
}

pub fn validate_session_id(session_id: &str) -> Result<(), RagError> {
    if session_id.trim().is_empty() {
        return Err(RagError::InvalidInput("session_id must not be empty".to_string()));
    }
    if session_id.chars().count() > MAX_SESSION_ID_CHARS {
        return Err(RagError::InvalidInput(format!(
            "session_id exceeds {} characters",
            MAX_SESSION_ID_CHARS
        )));
    }
    if session_id.chars().any(char::is_control) {
        return Err(RagError::InvalidInput(
            "session_id contains control characters".to_string(),
        ));
    }
    Ok(())
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatReply {
    pub response: String,
    pub session_id: SessionId,
    pub timestamp: String,
}

impl ChatReply {
    pub fn new(response: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            response: response.into(),
            session_id,
            timestamp: utc_timestamp(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatHistory {
    pub session_id: SessionId,
    pub messages: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub user_message: String,
    pub bot_response: String,
    pub timestamp: String,
}

// ===== LLM MESSAGES =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn estimate_tokens(&self) -> usize {
        TokenCounter::count_text(&self.content)
    }
}
