//! Promptcraft - conversational prompt-engineering assistant
//!
//! Guides a user through refining a prompt with a chat model, rendering the
//! model's tool calls as interactive widgets and persisting every session.

mod api;
mod attachment;
mod config;
mod conversation;
mod history;
mod llm;
mod message;
mod remote;
mod runtime;
mod store;
mod system_prompt;
mod tools;
mod widget;

use api::{create_router, AppState};
use config::AppConfig;
use llm::{LlmService, LoggingService, OpenAIService};
use remote::{GitHubSource, RemoteSource};
use runtime::{ChatController, LlmClient, ServiceLlmClient};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use store::{DurableStore, SqliteStore};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promptcraft=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path, capacity = config.store_capacity, "Opening store");
    let store = DurableStore::new(Arc::new(SqliteStore::open(
        &config.db_path,
        config.store_capacity,
    )?));

    let service: Arc<dyn LlmService> = Arc::new(OpenAIService::new(
        config.openai_api_key.clone(),
        config.model.clone(),
        config.base_url.clone(),
    )?);
    let llm: Arc<dyn LlmClient> = Arc::new(ServiceLlmClient::new(Arc::new(
        LoggingService::new(service),
    )));
    let remote: Arc<dyn RemoteSource> = Arc::new(GitHubSource::new()?);

    if config.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY not set; a key must be saved through settings");
    }
    tracing::info!(model = %config.model, base_url = %config.base_url, "Model client initialized");

    let controller = ChatController::open(
        llm.clone(),
        remote,
        store,
        &config.user,
        config.openai_api_key.clone(),
    );
    let state = AppState::new(controller, llm);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Promptcraft server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
