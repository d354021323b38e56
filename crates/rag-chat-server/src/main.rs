use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use rag_chat_server::config::Settings;
use rag_chat_server::handlers::build_router;
use rag_chat_server::services::conversation::{
    ContextBuilder, ConversationCache, ConversationManager, EmbeddingProvider, ManagerConfig,
};
use rag_chat_server::services::{EmbeddingService, IndexManager, LlmService, PgVectorConnector};
use rag_chat_server::state::AppState;
use rag_chat_server::utils::logger::init_logger;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logger()?;

    info!("🚀 Starting RAG chat server...");

    // Load configuration
    let settings = Settings::load()?;
    info!("✅ Configuration loaded");

    // Initialize services
    let embedding_service: Arc<dyn EmbeddingProvider> = Arc::new(EmbeddingService::new(
        &settings.embedding,
        settings.embedding_api_key(),
    )?);

    let llm_service = Arc::new(LlmService::new(settings.llm.clone())?);

    let index_manager = Arc::new(IndexManager::new(
        Arc::new(PgVectorConnector::new(
            settings.vector_store.clone(),
            embedding_service,
        )),
        settings.index_retry_after(),
    ));

    let conversation_manager = Arc::new(ConversationManager::new(
        ConversationCache::from_config(&settings.memory),
        ContextBuilder::new(settings.prompts.clone(), settings.memory.history_window),
        index_manager.clone(),
        llm_service,
        ManagerConfig::from_settings(&settings),
    ));

    // Warm the index; a failure here only degrades chat replies
    tokio::spawn({
        let index_manager = index_manager.clone();
        async move {
            match index_manager.acquire().await {
                Ok(_) => info!("✅ Retrieval index loaded"),
                Err(e) => warn!("⚠️ Retrieval index not loaded at startup: {}", e),
            }
        }
    });

    // Expired-session sweeper
    tokio::spawn({
        let manager = conversation_manager.clone();
        let period = Duration::from_secs(settings.memory.cleanup_interval_seconds.max(1));
        async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                manager.cleanup_expired_sessions();
            }
        }
    });

    // Build router
    let app = build_router(AppState::new(
        conversation_manager,
        settings.chat.max_message_chars,
    ));

    // Server address
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("🎯 Server listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
