//! Memory routes: list/create/search/extract/superseded/recalls plus the
//! per-id fetch/patch/delete/claims/restore group.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use super::state::{resolve_project_id, AppState};
use crate::error::{AppError, Result};
use crate::extraction::{self, ExtractionInput};
use crate::orchestrator::memory::{CreateMemoryOutcome, CreateMemoryRequest, PatchMemoryRequest};
use crate::retrieval::{self, RetrievalRequest};
use crate::types::{ListMemoriesOptions, Memory};

fn default_limit() -> i64 {
    25
}

/// A required query param that axum's `Query` extractor would otherwise
/// accept as absent without tripping validation: reject blank/missing values
/// through the normal `{error, message}` error mapping instead of leaving it
/// to `Option::unwrap`.
fn required_param<'a>(value: &'a Option<String>, code: &'static str) -> Result<&'a str> {
    match value.as_deref() {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(AppError::invalid(code)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub include_deleted: bool,
    #[serde(default)]
    pub include_superseded: bool,
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<Memory>>> {
    let project_id = resolve_project_id(&state, &headers)?;
    let subject_id = required_param(&params.subject_id, "subject_id_required")?;
    let options = ListMemoriesOptions {
        limit: params.limit,
        offset: params.offset,
        include_deleted: params.include_deleted,
        include_superseded: params.include_superseded,
    };
    let memories = state.storage.list_memories(&project_id, subject_id, options)?;
    Ok(Json(memories))
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateMemoryRequest>,
) -> Result<(StatusCode, Json<CreateMemoryOutcome>)> {
    let project_id = resolve_project_id(&state, &headers)?;
    let outcome = state.memory_orchestrator.create(&project_id, req).await?;
    let status = match &outcome {
        CreateMemoryOutcome::Created { .. } => StatusCode::CREATED,
        CreateMemoryOutcome::Skipped { .. } => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub min_score: f64,
    /// Reserved for a distance-metric override; this service always uses
    /// cosine similarity, so the parameter is accepted and ignored.
    #[serde(default)]
    pub distance: Option<String>,
    /// Prior conversation turns, newline-separated, used as classify context
    /// in the LLM-expanded pipeline.
    #[serde(default)]
    pub context: Option<String>,
}

pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchQuery>,
) -> Result<Json<retrieval::RetrievalResult>> {
    let _ = params.distance;
    let project_id = resolve_project_id(&state, &headers)?;
    let subject_id = required_param(&params.subject_id, "subject_id_required")?.to_string();
    let conversation_context = params
        .context
        .as_deref()
        .map(|c| c.split('\n').map(str::to_string).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let req = RetrievalRequest {
        project_id: project_id.clone(),
        subject_id,
        q: params.q.clone(),
        limit: params.limit,
        conversation_context,
    };

    let use_expanded = state.use_retrieval_expand && state.llm.name() != "none";
    let result = if use_expanded {
        retrieval::retrieve_expanded(state.storage.as_ref(), state.embedder.as_ref(), state.llm.as_ref(), &req).await?
    } else {
        retrieval::retrieve_simple(state.storage.as_ref(), state.embedder.as_ref(), &req).await?
    };
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub subject_id: String,
    pub text: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub learn: bool,
    #[serde(default)]
    pub conversation_context: Vec<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct ExtractResponse {
    pub learned: bool,
    pub extracted_count: usize,
    pub memories: Vec<extraction::ExtractedMemory>,
}

/// Run extraction; when `learn=true`, also persist each extracted memory
/// (with its claims attached via `source_memory_id`) through the memory and
/// claim orchestrators.
pub async fn extract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ExtractRequest>,
) -> Result<Json<ExtractResponse>> {
    let project_id = resolve_project_id(&state, &headers)?;
    if req.subject_id.trim().is_empty() {
        return Err(AppError::invalid("subject_id_required"));
    }
    if req.text.trim().is_empty() {
        return Err(AppError::invalid("text_required"));
    }

    let input = ExtractionInput {
        text: req.text.clone(),
        force: req.force,
        conversation_context: req.conversation_context.clone(),
    };
    let result = extraction::extract(state.llm.as_ref(), &input).await;

    if req.learn {
        for extracted in &result.memories {
            let create_req = CreateMemoryRequest {
                id: None,
                subject_id: req.subject_id.clone(),
                text: extracted.text.clone(),
                kind: Some(extracted.kind),
                visibility: Some(extracted.visibility),
                importance: Some(extracted.importance),
                confidence: Some(extracted.confidence),
                is_temporal: Some(extracted.is_temporal),
                tags: extracted.tags.clone(),
                metadata: serde_json::Value::Null,
                source_type: Some("extraction".to_string()),
                no_supersede: false,
                extract_claims: false,
            };
            let outcome = state.memory_orchestrator.create(&project_id, create_req).await?;
            let CreateMemoryOutcome::Created { id: memory_id, .. } = outcome else {
                continue;
            };
            for claim in &extracted.claims {
                let embedding_text = format!("{}: {}", claim.predicate, claim.object_value);
                let embedding = state.embedder.embed(&embedding_text).await;
                let input = crate::types::CreateClaimInput {
                    claim_id: None,
                    project_id: project_id.clone(),
                    subject_id: req.subject_id.clone(),
                    predicate: claim.predicate.clone(),
                    object_value: claim.object_value.clone(),
                    slot: None,
                    claim_type: Some(claim.claim_type.clone()),
                    confidence: Some(claim.confidence),
                    importance: None,
                    tags: Vec::new(),
                    source_memory_id: Some(memory_id.clone()),
                    subject_entity: None,
                    embedding: if embedding.is_empty() { None } else { Some(embedding) },
                };
                crate::orchestrator::claim::create_claim(state.storage.as_ref(), input)?;
            }
        }
    }

    let extracted_count = result.memories.len();
    Ok(Json(ExtractResponse {
        learned: req.learn,
        extracted_count,
        memories: result.memories,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SupersededQuery {
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

pub async fn superseded(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SupersededQuery>,
) -> Result<Json<Vec<Memory>>> {
    let project_id = resolve_project_id(&state, &headers)?;
    let subject_id = required_param(&params.subject_id, "subject_id_required")?;
    let memories = state
        .storage
        .list_superseded_memories(&project_id, subject_id, params.limit, params.offset)?;
    Ok(Json(memories))
}

#[derive(Debug, Deserialize)]
pub struct RecallsQuery {
    pub chat_id: Option<String>,
    pub memory_id: Option<String>,
    #[serde(default)]
    pub stats: bool,
    #[serde(default = "default_recalls_limit")]
    pub limit: i64,
}

fn default_recalls_limit() -> i64 {
    100
}

pub async fn recalls(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RecallsQuery>,
) -> Result<axum::response::Response> {
    let project_id = resolve_project_id(&state, &headers)?;

    if params.stats {
        let stats = state.storage.recall_stats(&project_id)?;
        return Ok(Json(stats).into_response());
    }

    if let Some(chat_id) = &params.chat_id {
        let events = state.storage.recall_events_by_chat(&project_id, chat_id, params.limit)?;
        return Ok(Json(events).into_response());
    }

    if let Some(memory_id) = &params.memory_id {
        let events = state.storage.recall_events_by_memory(&project_id, memory_id, params.limit)?;
        return Ok(Json(events).into_response());
    }

    Err(AppError::invalid("chat_id_or_memory_id_required"))
}

pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Memory>> {
    let project_id = resolve_project_id(&state, &headers)?;
    let memory = state
        .storage
        .get_memory(&project_id, &id)?
        .ok_or(AppError::NotFound("memory_not_found"))?;
    Ok(Json(memory))
}

pub async fn patch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<PatchMemoryRequest>,
) -> Result<Json<Memory>> {
    let project_id = resolve_project_id(&state, &headers)?;
    let memory = state.memory_orchestrator.patch(&project_id, &id, req).await?;
    Ok(Json(memory))
}

pub async fn delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let project_id = resolve_project_id(&state, &headers)?;
    let deleted = state.memory_orchestrator.delete(&project_id, &id)?;
    Ok(Json(serde_json::json!({"deleted": deleted})))
}

pub async fn claims(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<crate::types::ClaimWithAssertions>>> {
    let project_id = resolve_project_id(&state, &headers)?;
    let claims = state.storage.claims_for_memory(&project_id, &id)?;
    Ok(Json(claims))
}

pub async fn restore(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<crate::orchestrator::memory::RestoreResult>> {
    let project_id = resolve_project_id(&state, &headers)?;
    let result = state.memory_orchestrator.restore(&project_id, &id)?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_request_defaults() {
        let json = serde_json::json!({"subject_id": "u", "text": "I work at Acme"});
        let req: ExtractRequest = serde_json::from_value(json).unwrap();
        assert!(!req.force);
        assert!(!req.learn);
        assert!(req.conversation_context.is_empty());
    }
}
