//! Conversation memory management module
//!
//! Provides in-memory conversation state management with:
//! - Per-session serialized access (DashMap + per-session mutex)
//! - Token-budgeted FIFO eviction of whole turns
//! - Grounded prompt assembly from retrieved passages
//! - Request orchestration with degraded fallback

mod cache;
mod context_builder;
pub mod manager;
mod token_counter;
pub mod types;

pub use cache::{CacheStats, ConversationCache, SessionHandle};
pub use context_builder::ContextBuilder;
pub use manager::{
    ChatStage, ConversationManager, EmbeddingProvider, LlmProvider, ManagerConfig,
    RetrievalProvider,
};
pub use token_counter::TokenCounter;
pub use types::{
    ConversationContext, ConversationState, MemoryLimits, Passage, PromptTemplate, Turn,
};

pub use crate::models::chat::{ChatMessage, Role, SessionId};
