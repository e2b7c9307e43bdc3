//! Shared application state and project-id resolution.

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::embedding::Embedder;
use crate::error::{AppError, Result};
use crate::events::EventBus;
use crate::llm::LlmClient;
use crate::orchestrator::MemoryOrchestrator;
use crate::storage::StorageBackend;

const PROJECT_HEADER: &str = "x-project-id";

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageBackend>,
    pub embedder: Arc<dyn Embedder>,
    pub llm: Arc<dyn LlmClient>,
    pub events: EventBus,
    pub memory_orchestrator: MemoryOrchestrator,
    pub default_project_id: Option<String>,
    pub use_retrieval_expand: bool,
}

/// Resolve project context: `X-Project-Id` header, falling back to the
/// configured default. Every route except `/health` requires this to
/// resolve to something.
pub fn resolve_project_id(state: &AppState, headers: &HeaderMap) -> Result<String> {
    if let Some(value) = headers.get(PROJECT_HEADER) {
        if let Ok(s) = value.to_str() {
            if !s.trim().is_empty() {
                return Ok(s.to_string());
            }
        }
    }
    state
        .default_project_id
        .clone()
        .ok_or(AppError::invalid("project_id_required"))
}
