pub mod conversation;
pub mod embedding_service;
pub mod index;
pub mod llm_service;
pub mod rag_service;

pub use embedding_service::EmbeddingService;
pub use index::{IndexConnector, IndexManager, IndexStatus};
pub use llm_service::LlmService;
pub use rag_service::{PgVectorConnector, RagService};
