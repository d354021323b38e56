use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::models::chat::{ChatMessage, Role, SessionId};

use super::token_counter::TokenCounter;

/// One immutable conversation turn stored in session memory
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,

    /// Strictly increasing within a session, never reused after eviction
    pub ordinal: u64,

    /// Cached token estimate used by the memory budget
    pub tokens: usize,

    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// A retrieved passage with its relevance score
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub text: String,
    pub score: f32,
    pub source: Option<String>,
}

impl Passage {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
            source: None,
        }
    }
}

/// Request-scoped messages sent to the generation gateway
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationContext {
    /// Trimmed history followed by one synthetic instruction message
    pub messages: Vec<ChatMessage>,

    /// Concatenated passage texts, empty when nothing was retrieved
    pub grounding_block: String,
}

/// Size bounds enforced on every session
#[derive(Debug, Clone, Copy)]
pub struct MemoryLimits {
    pub max_tokens: usize,
    pub max_turns: Option<usize>,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            max_turns: None,
        }
    }
}

impl MemoryLimits {
    fn exceeded(&self, turns: usize, tokens: usize) -> bool {
        tokens > self.max_tokens || self.max_turns.is_some_and(|max| turns > max)
    }
}

/// Complete conversation state stored in memory cache
#[derive(Debug)]
pub struct ConversationState {
    pub session_id: SessionId,

    /// Stored turns, oldest first
    pub turns: VecDeque<Turn>,

    pub next_ordinal: u64,

    /// Sum of `tokens` over `turns`
    pub total_tokens: usize,

    /// Drives idle expiry and LRU eviction
    pub last_activity: Instant,

    pub metadata: ConversationMetadata,
}

impl ConversationState {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            turns: VecDeque::new(),
            next_ordinal: 0,
            total_tokens: 0,
            last_activity: Instant::now(),
            metadata: ConversationMetadata::default(),
        }
    }

    /// Append one turn, then evict oldest whole turns while over budget.
    /// The turn just appended is always kept.
    pub fn push(&mut self, role: Role, content: String, limits: &MemoryLimits) -> Turn {
        let tokens = TokenCounter::count_text(&content);
        let turn = Turn {
            role,
            content,
            ordinal: self.next_ordinal,
            tokens,
            created_at: Utc::now(),
        };

        self.next_ordinal += 1;
        self.total_tokens += tokens;
        self.turns.push_back(turn.clone());
        self.metadata.total_turns += 1;

        while self.turns.len() > 1 && limits.exceeded(self.turns.len(), self.total_tokens) {
            if let Some(evicted) = self.turns.pop_front() {
                self.total_tokens -= evicted.tokens;
                self.metadata.evicted_turns += 1;
            }
        }

        self.touch();
        turn
    }

    /// Last `n` turns, oldest first
    pub fn recent(&self, n: usize) -> Vec<Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.last_activity.elapsed() > ttl
    }

    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Conversation metadata for analytics
#[derive(Debug, Clone, Default)]
pub struct ConversationMetadata {
    /// Turns ever appended, including evicted ones
    pub total_turns: usize,

    pub evicted_turns: usize,
}

/// Typed instruction-and-grounding prompt
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub directives: Vec<String>,
    pub context_block: String,
    pub question: String,
}

impl PromptTemplate {
    /// Build the synthetic message content
    pub fn build(&self) -> String {
        let mut parts: Vec<String> = self
            .directives
            .iter()
            .map(|d| format!("- {}", d))
            .collect();

        parts.push(String::new());
        parts.push("Context:".to_string());
        parts.push(self.context_block.clone());
        parts.push(String::new());
        parts.push(format!("Question: {}", self.question));

        parts.join("\n")
    }
}
