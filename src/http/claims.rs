//! Claim routes: create/retract/detail plus the subject-scoped
//! truth/slot/slots/graph/history views.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use super::state::{resolve_project_id, AppState};
use crate::error::{AppError, Result};
use crate::orchestrator::claim;
use crate::types::{Claim, ClaimDetail, ClaimGraph, ClaimHistory, CreateClaimInput, RetractOutcome, SlotSnapshot, SlotsGrouped};

#[derive(Debug, Deserialize)]
pub struct CreateClaimRequest {
    pub claim_id: Option<String>,
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub predicate: Option<String>,
    #[serde(default)]
    pub object_value: Option<String>,
    pub slot: Option<String>,
    pub claim_type: Option<String>,
    pub confidence: Option<f64>,
    pub importance: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source_memory_id: Option<String>,
    pub subject_entity: Option<String>,
}

/// Required string field that must also not be blank once present, distinct
/// from the optional fields on this request that may legitimately be absent.
fn required_field(value: &Option<String>, code: &'static str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(AppError::invalid(code)),
    }
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateClaimRequest>,
) -> Result<(axum::http::StatusCode, Json<Claim>)> {
    let project_id = resolve_project_id(&state, &headers)?;
    let subject_id = required_field(&req.subject_id, "subject_id_required")?;
    let predicate = required_field(&req.predicate, "predicate_required")?;
    let object_value = required_field(&req.object_value, "object_value_required")?;

    let embedding_text = format!("{predicate}: {object_value}");
    let embedding = state.embedder.embed(&embedding_text).await;

    let input = CreateClaimInput {
        claim_id: req.claim_id,
        project_id,
        subject_id,
        predicate,
        object_value,
        slot: req.slot,
        claim_type: req.claim_type,
        confidence: req.confidence,
        importance: req.importance,
        tags: req.tags,
        source_memory_id: req.source_memory_id,
        subject_entity: req.subject_entity,
        embedding: if embedding.is_empty() { None } else { Some(embedding) },
    };
    let created = claim::create_claim(state.storage.as_ref(), input)?;
    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize, Default)]
pub struct RetractRequest {
    pub reason: Option<String>,
}

/// Body is `{}` when no reason is given.
pub async fn retract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<RetractRequest>,
) -> Result<Json<RetractOutcome>> {
    let project_id = resolve_project_id(&state, &headers)?;
    let outcome = claim::retract_claim(state.storage.as_ref(), &project_id, &id, body.reason)?;
    Ok(Json(outcome))
}

pub async fn detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ClaimDetail>> {
    let project_id = resolve_project_id(&state, &headers)?;
    let detail = state
        .storage
        .get_claim_detail(&project_id, &id)?
        .ok_or(AppError::NotFound("claim_not_found"))?;
    Ok(Json(detail))
}

#[derive(Debug, Deserialize)]
pub struct TruthQuery {
    /// Reserved for including source-memory projections inline; this
    /// deployment always returns the bare slot snapshot and expects callers
    /// to follow `claim.source_memory_id` themselves.
    #[serde(default)]
    pub include_source: bool,
}

pub async fn truth(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(subject_id): Path<String>,
    Query(params): Query<TruthQuery>,
) -> Result<Json<Vec<SlotSnapshot>>> {
    let _ = params.include_source;
    let project_id = resolve_project_id(&state, &headers)?;
    let truth = state.storage.get_current_truth(&project_id, &subject_id)?;
    Ok(Json(truth))
}

pub async fn slot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((subject_id, slot)): Path<(String, String)>,
) -> Result<Json<SlotSnapshot>> {
    let project_id = resolve_project_id(&state, &headers)?;
    let snapshot = state
        .storage
        .get_current_slot(&project_id, &subject_id, &slot)?
        .ok_or(AppError::NotFound("slot_not_found"))?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn slots(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(subject_id): Path<String>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<SlotsGrouped>> {
    let project_id = resolve_project_id(&state, &headers)?;
    let grouped = state.storage.get_slots(&project_id, &subject_id, params.limit)?;
    Ok(Json(grouped))
}

pub async fn graph(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(subject_id): Path<String>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<ClaimGraph>> {
    let project_id = resolve_project_id(&state, &headers)?;
    let graph = state.storage.get_claim_graph(&project_id, &subject_id, params.limit)?;
    Ok(Json(graph))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub slot: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

pub async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(subject_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<ClaimHistory>> {
    let project_id = resolve_project_id(&state, &headers)?;
    let history = state
        .storage
        .get_claim_history(&project_id, &subject_id, params.slot.as_deref(), params.limit)?;
    Ok(Json(history))
}
