//! Verity server — process entry point.
//!
//! Run with: verity-server

use std::sync::Arc;

use clap::Parser;

use verity::config::Args;
use verity::embedding::create_embedder;
use verity::events::EventBus;
use verity::http;
use verity::llm::create_llm_client;
use verity::orchestrator::MemoryOrchestrator;
use verity::storage::{SqliteBackend, Storage, StorageBackend};
use verity::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init();

    let db_path = args.expanded_db_path();
    tracing::info!(db_path = %db_path, "opening storage");
    let storage = Storage::open(&db_path)?;
    let storage: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(storage));

    let embedder = create_embedder(&args);
    let llm = create_llm_client(&args);
    tracing::info!(embedder = embedder.name(), llm = llm.name(), ai_mode = ?args.ai_mode, "capabilities configured");

    let events = EventBus::new();
    let memory_orchestrator = MemoryOrchestrator::new(storage.clone(), embedder.clone(), llm.clone(), events.clone());

    let state = http::AppState {
        storage,
        embedder,
        llm,
        events,
        memory_orchestrator,
        default_project_id: args.default_project_id.clone(),
        use_retrieval_expand: args.use_retrieval_expand,
    };

    let app = http::router(state);

    let addr = format!("{}:{}", args.bind_addr, args.bind_port);
    tracing::info!(addr = %addr, "starting verity-server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
