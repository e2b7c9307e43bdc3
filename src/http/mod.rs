//! HTTP surface: axum router, shared state, and route handlers.

mod claims;
mod events;
mod health;
mod memories;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the full router. `/health` is the only route that does not
/// require project context.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/v1/events/memories", get(events::subscribe))
        .route("/api/v1/memories", get(memories::list).post(memories::create))
        .route("/api/v1/memories/search", get(memories::search))
        .route("/api/v1/memories/extract", post(memories::extract))
        .route("/api/v1/memories/superseded", get(memories::superseded))
        .route("/api/v1/memories/recalls", get(memories::recalls))
        .route(
            "/api/v1/memories/:id",
            get(memories::get).patch(memories::patch).delete(memories::delete),
        )
        .route("/api/v1/memories/:id/claims", get(memories::claims))
        .route("/api/v1/memories/:id/restore", post(memories::restore))
        .route("/api/v1/claims", post(claims::create))
        .route("/api/v1/claims/:id/retract", post(claims::retract))
        .route("/api/v1/claims/:id", get(claims::detail))
        .route("/api/v1/claims/subject/:subject_id/truth", get(claims::truth))
        .route("/api/v1/claims/subject/:subject_id/slot/:slot", get(claims::slot))
        .route("/api/v1/claims/subject/:subject_id/slots", get(claims::slots))
        .route("/api/v1/claims/subject/:subject_id/graph", get(claims::graph))
        .route("/api/v1/claims/subject/:subject_id/history", get(claims::history))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
