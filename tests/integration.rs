//! End-to-end HTTP surface tests against an in-memory SQLite store,
//! covering the scenario set the memory-and-claim substrate is built around.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use verity::embedding::{Embedder, NullEmbedder};
use verity::events::EventBus;
use verity::http::{self, AppState};
use verity::llm::NullLlmClient;
use verity::orchestrator::MemoryOrchestrator;
use verity::storage::{SqliteBackend, Storage, StorageBackend};

/// Returns a fixed 2-d vector for a handful of known texts, and an empty
/// vector (degraded embedding) for everything else — enough to drive
/// deterministic duplicate/conflict-band thresholds without a real model.
struct FixtureEmbedder;

#[async_trait]
impl Embedder for FixtureEmbedder {
    async fn embed(&self, text: &str) -> Vec<f32> {
        match text {
            "My favorite color is yellow" => vec![1.0, 0.0],
            // cosine(A, B) = 0.7 -> 70 on the 0-100 scale, inside the
            // [60, 85) conflict band.
            "Actually my favorite color is red now" => vec![0.7, 0.714_143],
            _ => Vec::new(),
        }
    }

    fn dimensions(&self) -> usize {
        2
    }

    fn name(&self) -> &str {
        "fixture"
    }
}

fn app_with_embedder(embedder: Arc<dyn Embedder>) -> Router {
    let storage: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(Storage::open_in_memory().unwrap()));
    let llm = Arc::new(NullLlmClient);
    let events = EventBus::new();
    let memory_orchestrator = MemoryOrchestrator::new(storage.clone(), embedder.clone(), llm.clone(), events.clone());

    let state = AppState {
        storage,
        embedder,
        llm,
        events,
        memory_orchestrator,
        default_project_id: Some("proj_test".to_string()),
        use_retrieval_expand: true,
    };
    http::router(state)
}

fn app() -> Router {
    app_with_embedder(Arc::new(NullEmbedder::new(2)))
}

async fn post_json(app: &Router, path: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get_json(app: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder().method("GET").uri(path).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn create_memory_returns_201_and_is_listable() {
    let app = app();
    let (status, body) = post_json(
        &app,
        "/api/v1/memories",
        serde_json::json!({"subject_id": "user_web_e2e", "text": "My favorite color is yellow", "extract_claims": false}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"], true);
    assert_eq!(body["superseded_count"], 0);
    let id = body["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("mem_"));

    let (status, list) = get_json(&app, "/api/v1/memories?subject_id=user_web_e2e").await;
    assert_eq!(status, StatusCode::OK);
    let memories = list.as_array().unwrap();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0]["id"], id);
}

#[tokio::test]
async fn events_subscribe_opens_an_sse_stream() {
    let app = app();
    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/events/memories?subject_id=user_web_e2e")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
}

#[tokio::test]
async fn duplicate_create_is_skipped() {
    let app = app_with_embedder(Arc::new(FixtureEmbedder));
    let body = serde_json::json!({"subject_id": "user_dup", "text": "My favorite color is yellow", "extract_claims": false});

    let (status, first) = post_json(&app, "/api/v1/memories", body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["created"], true);

    let (status, second) = post_json(&app, "/api/v1/memories", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["skipped"], true);
    assert_eq!(second["reason"], "duplicate");
}

#[tokio::test]
async fn conflicting_memory_supersedes_the_prior_one() {
    let app = app_with_embedder(Arc::new(FixtureEmbedder));

    let (status, first) = post_json(
        &app,
        "/api/v1/memories",
        serde_json::json!({"subject_id": "user_super", "text": "My favorite color is yellow", "extract_claims": false}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let first_id = first["id"].as_str().unwrap().to_string();

    let (status, second) = post_json(
        &app,
        "/api/v1/memories",
        serde_json::json!({"subject_id": "user_super", "text": "Actually my favorite color is red now", "extract_claims": false}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["superseded_count"], 1);
    assert_eq!(second["superseded_ids"].as_array().unwrap(), &[serde_json::json!(first_id)]);

    let (_, superseded) = get_json(&app, "/api/v1/memories/superseded?subject_id=user_super").await;
    let rows = superseded.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], first_id);
}

#[tokio::test]
async fn retracting_a_claim_restores_the_previous_winner() {
    let app = app();

    let (status, claim_a) = post_json(
        &app,
        "/api/v1/claims",
        serde_json::json!({"subject_id": "user_claims", "predicate": "favorite_color", "object_value": "yellow"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, claim_b) = post_json(
        &app,
        "/api/v1/claims",
        serde_json::json!({"subject_id": "user_claims", "predicate": "favorite_color", "object_value": "blue"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let claim_b_id = claim_b["claim_id"].as_str().unwrap().to_string();
    let claim_a_id = claim_a["claim_id"].as_str().unwrap().to_string();

    let (_, before) = get_json(&app, "/api/v1/claims/subject/user_claims/slot/favorite_color").await;
    assert_eq!(before["claim"]["object_value"], "blue");

    let (status, retract) = post_json(&app, &format!("/api/v1/claims/{claim_b_id}/retract"), serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retract["restored_previous"], true);
    assert_eq!(retract["previous_claim_id"], claim_a_id);

    let (_, after) = get_json(&app, "/api/v1/claims/subject/user_claims/slot/favorite_color").await;
    assert_eq!(after["claim"]["object_value"], "yellow");
}

#[tokio::test]
async fn extraction_only_does_not_persist_when_learn_is_false() {
    let app = app();
    let (status, result) = post_json(
        &app,
        "/api/v1/memories/extract",
        serde_json::json!({"subject_id": "u", "text": "I work at Acme", "learn": false}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["learned"], false);
    assert!(result["extracted_count"].as_u64().unwrap() >= 1);

    let (_, list) = get_json(&app, "/api/v1/memories?subject_id=u").await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn degraded_embedder_still_creates_memories() {
    let app = app();
    let (status, body) = post_json(
        &app,
        "/api/v1/memories",
        serde_json::json!({"subject_id": "user_degraded", "text": "a note with no embedder configured", "extract_claims": false}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"], true);
    assert_eq!(body["superseded_count"], 0);
}

#[tokio::test]
async fn missing_project_context_is_rejected() {
    let storage: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(Storage::open_in_memory().unwrap()));
    let embedder: Arc<dyn Embedder> = Arc::new(NullEmbedder::new(2));
    let llm = Arc::new(NullLlmClient);
    let events = EventBus::new();
    let memory_orchestrator = MemoryOrchestrator::new(storage.clone(), embedder.clone(), llm.clone(), events.clone());
    let state = AppState {
        storage,
        embedder,
        llm,
        events,
        memory_orchestrator,
        default_project_id: None,
        use_retrieval_expand: true,
    };
    let app = http::router(state);

    let (status, body) = get_json(&app, "/api/v1/memories?subject_id=whoever").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "project_id_required");
}

#[tokio::test]
async fn patch_then_delete_then_restore_round_trips() {
    let app = app();
    let (_, created) = post_json(
        &app,
        "/api/v1/memories",
        serde_json::json!({"subject_id": "user_lifecycle", "text": "likes tea", "extract_claims": false}),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let request = Request::builder()
        .method("PATCH")
        .uri(format!("/api/v1/memories/{id}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({"importance": 90}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let patched: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(patched["importance"], 90);

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/memories/{id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let deleted: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(deleted["deleted"], true);

    let (status, restored) = post_json(&app, &format!("/api/v1/memories/{id}/restore"), serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(restored["restored"], true);
    assert_eq!(restored["memory"]["is_deleted"], false);
}
