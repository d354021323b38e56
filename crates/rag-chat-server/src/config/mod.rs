pub mod settings;

pub use settings::{
    ChatConfig, EmbeddingConfig, LlmConfig, MemoryConfig, PromptsConfig, RagConfig, ServerConfig,
    Settings, VectorStoreConfig,
};
