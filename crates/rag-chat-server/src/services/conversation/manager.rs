use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::Settings;
use crate::models::chat::{
    generate_session_id, validate_session_id, ChatHistory, ChatMessage, ChatReply, HistoryEntry,
    Role, SessionId,
};
use crate::services::index::{IndexManager, IndexStatus};
use crate::utils::error::RagError;

use super::cache::{CacheStats, ConversationCache};
use super::context_builder::ContextBuilder;
use super::types::{Passage, Turn};

/// Trait for embedding service
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Retrieval gateway: top-k passages for a raw query
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RetrievalProvider: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Passage>>;
}

/// Generation gateway: one completion for an ordered message list
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Orchestration stages of a single chat request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStage {
    IndexCheck,
    Retrieve,
    Assemble,
    Generate,
    Persist,
    Respond,
    DegradedRespond,
}

impl fmt::Display for ChatStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChatStage::IndexCheck => "index_check",
            ChatStage::Retrieve => "retrieve",
            ChatStage::Assemble => "assemble",
            ChatStage::Generate => "generate",
            ChatStage::Persist => "persist",
            ChatStage::Respond => "respond",
            ChatStage::DegradedRespond => "degraded_respond",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub top_k: usize,
    pub retrieval_timeout: Duration,
    pub generation_timeout: Duration,
    pub generation_max_attempts: u32,
    pub generation_retry_backoff: Duration,
    pub unavailable_reply: String,
}

impl ManagerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            top_k: settings.rag.retrieval_top_k,
            retrieval_timeout: settings.retrieval_timeout(),
            generation_timeout: settings.generation_timeout(),
            generation_max_attempts: settings.chat.generation_max_attempts,
            generation_retry_backoff: Duration::from_millis(
                settings.chat.generation_retry_backoff_ms,
            ),
            unavailable_reply: settings.prompts.unavailable_reply.clone(),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            retrieval_timeout: Duration::from_secs(10),
            generation_timeout: Duration::from_secs(60),
            generation_max_attempts: 1,
            generation_retry_backoff: Duration::from_secs(1),
            unavailable_reply: "Vector index not available. Please check the server logs."
                .to_string(),
        }
    }
}

/// Drives one request through index check, retrieval, assembly,
/// generation and persistence.
pub struct ConversationManager {
    cache: ConversationCache,
    context_builder: ContextBuilder,
    index: Arc<IndexManager>,
    llm_provider: Arc<dyn LlmProvider>,
    config: ManagerConfig,
}

impl ConversationManager {
    pub fn new(
        cache: ConversationCache,
        context_builder: ContextBuilder,
        index: Arc<IndexManager>,
        llm_provider: Arc<dyn LlmProvider>,
        config: ManagerConfig,
    ) -> Self {
        info!(
            "Conversation manager ready (top_k: {}, history window: {}, generation attempts: {})",
            config.top_k,
            context_builder.history_window(),
            config.generation_max_attempts
        );
        Self {
            cache,
            context_builder,
            index,
            llm_provider,
            config,
        }
    }

    /// Answer one message. A missing session id starts a new session.
    pub async fn chat(
        &self,
        message: &str,
        session_id: Option<String>,
    ) -> Result<ChatReply, RagError> {
        if message.trim().is_empty() {
            return Err(RagError::InvalidInput("message must not be empty".to_string()));
        }
        if let Some(id) = &session_id {
            validate_session_id(id)?;
        }

        let session_id = session_id.unwrap_or_else(generate_session_id);
        let span = info_span!("chat", session_id = %session_id, stage = tracing::field::Empty);

        self.handle_message(message, session_id).instrument(span).await
    }

    async fn handle_message(
        &self,
        message: &str,
        session_id: SessionId,
    ) -> Result<ChatReply, RagError> {
        enter_stage(ChatStage::IndexCheck);
        let retriever = match self.index.acquire().await {
            Ok(retriever) => retriever,
            Err(e) => {
                enter_stage(ChatStage::DegradedRespond);
                warn!("Answering without generation: {}", e);
                return Ok(ChatReply::new(self.config.unavailable_reply.clone(), session_id));
            }
        };

        self.cache.get_or_create(&session_id);

        enter_stage(ChatStage::Retrieve);
        let passages = self.retrieve_passages(retriever.as_ref(), message).await;

        enter_stage(ChatStage::Assemble);
        let history = self
            .cache
            .recent_turns(&session_id, self.context_builder.history_window());
        let context = self.context_builder.assemble(&passages, &history, message);

        enter_stage(ChatStage::Generate);
        let response = self.call_llm_with_retry(&context.messages).await?;

        enter_stage(ChatStage::Persist);
        let (user_turn, assistant_turn) =
            self.cache
                .append_exchange(&session_id, message.to_string(), response.clone());
        debug!(
            "Stored turns {} and {}",
            user_turn.ordinal, assistant_turn.ordinal
        );

        enter_stage(ChatStage::Respond);
        info!(
            "Chat answered ({} passages, {} history turns)",
            passages.len(),
            history.len()
        );
        Ok(ChatReply::new(response, session_id))
    }

    /// Retrieval never fails the request: errors and timeouts yield no passages
    async fn retrieve_passages(&self, retriever: &dyn RetrievalProvider, query: &str) -> Vec<Passage> {
        let outcome = tokio::time::timeout(
            self.config.retrieval_timeout,
            retriever.retrieve(query, self.config.top_k),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(passages)) => {
                debug!("Retrieved {} passages", passages.len());
                return passages;
            }
            Ok(Err(e)) => RagError::RetrievalFailure(format!("{:#}", e)),
            Err(_) => RagError::RetrievalFailure(format!(
                "timed out after {:?}",
                self.config.retrieval_timeout
            )),
        };

        warn!("{}; continuing with empty context", failure);
        Vec::new()
    }

    async fn call_llm_with_retry(&self, messages: &[ChatMessage]) -> Result<String, RagError> {
        let max_attempts = self.config.generation_max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let outcome = tokio::time::timeout(
                self.config.generation_timeout,
                self.llm_provider.generate(messages),
            )
            .await;

            match outcome {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => last_error = format!("{:#}", e),
                Err(_) => {
                    last_error = format!("timed out after {:?}", self.config.generation_timeout)
                }
            }

            if attempt < max_attempts {
                warn!(
                    "LLM call attempt {}/{} failed: {}",
                    attempt, max_attempts, last_error
                );
                tokio::time::sleep(self.config.generation_retry_backoff * attempt).await;
            }
        }

        error!("LLM call failed after {} attempts: {}", max_attempts, last_error);
        Err(RagError::GenerationFailure(last_error))
    }

    /// Stored exchanges of a session, or None if it is unknown
    pub fn history(&self, session_id: &str) -> Option<ChatHistory> {
        let turns = self.cache.history(session_id)?;
        Some(ChatHistory {
            session_id: session_id.to_string(),
            messages: pair_turns(&turns),
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn index_status(&self) -> IndexStatus {
        self.index.status()
    }

    /// Drop the cached index handle or failure and reconnect now
    pub async fn reload_index(&self) -> IndexStatus {
        self.index.reload().await
    }

    pub fn cleanup_expired_sessions(&self) -> usize {
        self.cache.cleanup_expired()
    }
}

fn enter_stage(stage: ChatStage) {
    Span::current().record("stage", tracing::field::display(stage));
    debug!("Stage: {}", stage);
}

/// Pair each user turn with the assistant turn right after it.
/// Unmatched turns get an empty counterpart.
fn pair_turns(turns: &[Turn]) -> Vec<HistoryEntry> {
    let mut entries = Vec::new();
    let mut iter = turns.iter().peekable();

    while let Some(turn) = iter.next() {
        let timestamp = turn
            .created_at
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

        match turn.role {
            Role::User => {
                let bot_response = match iter.peek() {
                    Some(next) if next.role == Role::Assistant => {
                        iter.next().map(|t| t.content.clone()).unwrap_or_default()
                    }
                    _ => String::new(),
                };
                entries.push(HistoryEntry {
                    user_message: turn.content.clone(),
                    bot_response,
                    timestamp,
                });
            }
            Role::Assistant => entries.push(HistoryEntry {
                user_message: String::new(),
                bot_response: turn.content.clone(),
                timestamp,
            }),
            Role::System => {}
        }
    }

    entries
}
