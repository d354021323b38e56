use config::{builder::DefaultState, Config, ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::error::RagError;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Chat-completions endpoint (OpenAI compatible)
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    /// Falls back to `llm.api_key` when unset
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            api_key: None,
            model: default_embedding_model(),
            dimension: default_dimension(),
            timeout_seconds: default_embedding_timeout(),
        }
    }
}

/// pgvector backend holding the pre-built passage index.
/// `database` is the schema, `collection` the table.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub connection_string: String,
    #[serde(default = "default_schema")]
    pub database: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default = "default_pool_size")]
    pub pool_max_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RagConfig {
    #[serde(default = "default_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "default_retrieval_timeout_ms")]
    pub retrieval_timeout_ms: u64,
    /// How long a failed index initialization is cached before the next retry
    #[serde(default = "default_index_retry_seconds")]
    pub index_retry_seconds: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            retrieval_top_k: default_top_k(),
            retrieval_timeout_ms: default_retrieval_timeout_ms(),
            index_retry_seconds: default_index_retry_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MemoryConfig {
    /// Number of stored turns replayed ahead of the grounding message
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_memory_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub max_turns: Option<usize>,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_tokens: default_memory_tokens(),
            max_turns: None,
            max_sessions: default_max_sessions(),
            session_ttl_seconds: default_session_ttl(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
    #[serde(default = "default_generation_attempts")]
    pub generation_max_attempts: u32,
    #[serde(default = "default_generation_backoff_ms")]
    pub generation_retry_backoff_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
            generation_timeout_ms: default_generation_timeout_ms(),
            generation_max_attempts: default_generation_attempts(),
            generation_retry_backoff_ms: default_generation_backoff_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PromptsConfig {
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
    /// Offered verbatim when the context does not hold the answer
    #[serde(default = "default_refusal_messages")]
    pub refusal_messages: Vec<String>,
    #[serde(default = "default_greeting_reply")]
    pub greeting_reply: String,
    #[serde(default)]
    pub extra_directives: Vec<String>,
    /// Returned without generation when the retrieval index is unavailable
    #[serde(default = "default_unavailable_reply")]
    pub unavailable_reply: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            assistant_name: default_assistant_name(),
            refusal_messages: default_refusal_messages(),
            greeting_reply: default_greeting_reply(),
            extra_directives: Vec::new(),
            unavailable_reply: default_unavailable_reply(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_llm_model() -> String {
    "gpt-5-nano-2025-08-07".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

fn default_dimension() -> usize {
    1536
}

fn default_embedding_timeout() -> u64 {
    60
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    60
}

fn default_top_k() -> usize {
    5
}

fn default_retrieval_timeout_ms() -> u64 {
    10_000
}

fn default_index_retry_seconds() -> u64 {
    30
}

fn default_history_window() -> usize {
    3
}

fn default_memory_tokens() -> usize {
    4000
}

fn default_max_sessions() -> usize {
    10_000
}

fn default_session_ttl() -> u64 {
    6 * 60 * 60
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_max_message_chars() -> usize {
    4000
}

fn default_generation_timeout_ms() -> u64 {
    60_000
}

fn default_generation_attempts() -> u32 {
    1
}

fn default_generation_backoff_ms() -> u64 {
    1000
}

fn default_assistant_name() -> String {
    "the document portal".to_string()
}

fn default_refusal_messages() -> Vec<String> {
    vec![
        "मुझे इस प्रश्न का उत्तर नहीं मिला। कृपया पोर्टल देखें।".to_string(),
        "I could not find the answer to this question. Please visit the portal.".to_string(),
    ]
}

fn default_greeting_reply() -> String {
    "How can I help you?".to_string()
}

fn default_unavailable_reply() -> String {
    "Vector index not available. Please check the server logs.".to_string()
}

/// Legacy deployment variable names, mapped onto settings keys
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("OPENAI_API_KEY", "llm.api_key"),
    ("COSMOS_CONN_STR", "vector_store.connection_string"),
    ("DB_NAME", "vector_store.database"),
    ("COLLECTION_NAME", "vector_store.collection"),
];

impl Settings {
    /// Load `config/settings.toml` (optional), then `APP_*` environment
    /// variables (e.g. `APP_LLM__API_KEY`), then the legacy variable names.
    pub fn load() -> Result<Self, RagError> {
        dotenvy::dotenv().ok();

        let builder = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        Self::finish(Self::with_legacy_env(builder, |var| std::env::var(var).ok())?)
    }

    /// Parse settings from a TOML document, without consulting the environment
    pub fn from_toml_str(raw: &str) -> Result<Self, RagError> {
        Self::finish(Config::builder().add_source(File::from_str(raw, FileFormat::Toml)))
    }

    /// Overlay legacy variables read through `lookup`; blank values are skipped
    fn with_legacy_env<F>(
        mut builder: ConfigBuilder<DefaultState>,
        lookup: F,
    ) -> Result<ConfigBuilder<DefaultState>, RagError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (var, key) in LEGACY_ENV_KEYS {
            let value = lookup(var).filter(|v| !v.trim().is_empty());
            builder = builder.set_override_option(*key, value)?;
        }
        Ok(builder)
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Self, RagError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), RagError> {
        let required = [
            ("llm.api_key", &self.llm.api_key),
            ("vector_store.connection_string", &self.vector_store.connection_string),
            ("vector_store.database", &self.vector_store.database),
            ("vector_store.collection", &self.vector_store.collection),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(key, _)| *key)
            .collect();

        if !missing.is_empty() {
            return Err(RagError::Configuration(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        let positive = [
            ("rag.retrieval_top_k", self.rag.retrieval_top_k),
            ("memory.max_tokens", self.memory.max_tokens),
            ("memory.max_sessions", self.memory.max_sessions),
            ("chat.max_message_chars", self.chat.max_message_chars),
            ("embedding.dimension", self.embedding.dimension),
        ];

        if let Some((key, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(RagError::Configuration(format!("{} must be greater than zero", key)));
        }

        if self.memory.max_turns == Some(0) {
            return Err(RagError::Configuration(
                "memory.max_turns must be greater than zero when set".to_string(),
            ));
        }

        if self.chat.generation_max_attempts == 0 {
            return Err(RagError::Configuration(
                "chat.generation_max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn embedding_api_key(&self) -> &str {
        self.embedding
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .unwrap_or(&self.llm.api_key)
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.rag.retrieval_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.chat.generation_timeout_ms)
    }

    pub fn index_retry_after(&self) -> Duration {
        Duration::from_secs(self.rag.index_retry_seconds)
    }
}
