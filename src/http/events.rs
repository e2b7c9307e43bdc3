//! SSE subscribe endpoint for the per-project memory event stream.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use serde::Deserialize;

use super::state::{resolve_project_id, AppState};
use crate::error::Result;
use crate::sse;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub subject_id: Option<String>,
}

pub async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<EventsQuery>,
) -> Result<impl axum::response::IntoResponse> {
    let project_id = resolve_project_id(&state, &headers)?;
    Ok(sse::stream(state.events.clone(), project_id, params.subject_id))
}
