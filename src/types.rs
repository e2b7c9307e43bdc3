//! Core domain types for the memory-and-claim substrate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque identifier for a memory, e.g. `mem_5e1f...`.
pub type MemoryId = String;
/// Opaque identifier for a claim, e.g. `clm_5e1f...`.
pub type ClaimId = String;
/// Opaque identifier for a claim assertion, e.g. `cla_5e1f...`.
pub type AssertionId = String;
/// Opaque identifier for a claim edge, e.g. `edg_5e1f...`.
pub type EdgeId = String;

/// Maximum length of `Memory::text`, enforced at the orchestrator boundary.
pub const MAX_MEMORY_TEXT_LEN: usize = 10_000;

/// Generate a new prefixed id, e.g. `new_id("mem")` -> `"mem_<uuid-v4>"`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4())
}

/// Kind of a memory row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Fact,
    Preference,
    Context,
    Note,
    Event,
    Trait,
}

impl Default for MemoryKind {
    fn default() -> Self {
        MemoryKind::Fact
    }
}

/// Visibility of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Shared,
    Public,
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Private
    }
}

/// Lifecycle status of a memory row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    Active,
    Superseded,
}

impl Default for MemoryStatus {
    fn default() -> Self {
        MemoryStatus::Active
    }
}

impl std::fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryStatus::Active => write!(f, "active"),
            MemoryStatus::Superseded => write!(f, "superseded"),
        }
    }
}

impl std::str::FromStr for MemoryStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MemoryStatus::Active),
            "superseded" => Ok(MemoryStatus::Superseded),
            other => Err(format!("unknown memory status: {other}")),
        }
    }
}

/// A durable, subject-scoped textual record of user context or fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub project_id: String,
    pub subject_id: String,
    pub text: String,
    pub kind: MemoryKind,
    pub visibility: Visibility,
    pub importance: i32,
    pub confidence: f64,
    pub is_temporal: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Present only when the row carries an embedding; never serialized back
    /// to callers who did not ask for it (callers see `has_embedding` instead).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub status: MemoryStatus,
    pub superseded_by: Option<MemoryId>,
    pub is_deleted: bool,
    pub source_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_reinforced_at: DateTime<Utc>,
}

impl Memory {
    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }
}

/// A search or retrieval hit: a memory plus its ranking scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub memory: Memory,
    /// Raw similarity (cosine * 100), or 0 when there is no embedding.
    pub score: f64,
    /// Fused ranking signal combining similarity, importance, confidence,
    /// and lexical-match bonuses.
    pub effective_score: f64,
}

/// Status of a claim row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Active,
    Retracted,
}

impl std::fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimStatus::Active => write!(f, "active"),
            ClaimStatus::Retracted => write!(f, "retracted"),
        }
    }
}

impl std::str::FromStr for ClaimStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ClaimStatus::Active),
            "retracted" => Ok(ClaimStatus::Retracted),
            other => Err(format!("unknown claim status: {other}")),
        }
    }
}

/// A structured (predicate, object_value) assertion derived from or attached
/// to a memory. `claim_type` is an open string set (fact/preference/goal/event/…),
/// inferred by [`infer_claim_type`] when not supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: ClaimId,
    pub project_id: String,
    pub subject_id: String,
    pub predicate: String,
    pub object_value: String,
    pub slot: String,
    pub claim_type: String,
    pub confidence: f64,
    pub importance: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source_memory_id: Option<MemoryId>,
    pub subject_entity: String,
    pub status: ClaimStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub retracted_at: Option<DateTime<Utc>>,
    pub retract_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Infer a claim's type from its predicate.
pub fn infer_claim_type(predicate: &str) -> &'static str {
    if predicate.starts_with("favorite_")
        || predicate.starts_with("likes_")
        || predicate.starts_with("dislikes_")
    {
        "preference"
    } else if predicate.contains("goal") || predicate.starts_with("wants_") {
        "goal"
    } else if predicate.starts_with("did_") || predicate.starts_with("event_") {
        "event"
    } else {
        "fact"
    }
}

/// A typed value carried by a [`ClaimAssertion`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "object_type", rename_all = "snake_case")]
pub enum AssertionValue {
    String { value_string: String },
    Number { value_number: f64 },
    Date { value_date: DateTime<Utc> },
    Json { value_json: serde_json::Value },
}

/// One piece of evidence supporting a claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimAssertion {
    pub assertion_id: AssertionId,
    pub claim_id: ClaimId,
    pub memory_id: Option<MemoryId>,
    #[serde(flatten)]
    pub value: AssertionValue,
    pub confidence: f64,
    pub status: ClaimStatus,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Typed directed relation between two claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Supersedes,
    Supports,
    Duplicates,
    Related,
    Retracts,
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EdgeType::Supersedes => "supersedes",
            EdgeType::Supports => "supports",
            EdgeType::Duplicates => "duplicates",
            EdgeType::Related => "related",
            EdgeType::Retracts => "retracts",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EdgeType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supersedes" => Ok(EdgeType::Supersedes),
            "supports" => Ok(EdgeType::Supports),
            "duplicates" => Ok(EdgeType::Duplicates),
            "related" => Ok(EdgeType::Related),
            "retracts" => Ok(EdgeType::Retracts),
            other => Err(format!("unknown edge type: {other}")),
        }
    }
}

/// A directed, typed relation between two claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimEdge {
    pub edge_id: EdgeId,
    pub project_id: String,
    pub from_claim_id: ClaimId,
    pub to_claim_id: ClaimId,
    pub edge_type: EdgeType,
    pub weight: f64,
    pub reason_code: Option<String>,
    pub reason_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Status of a slot's current winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Active,
    Superseded,
    Retracted,
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SlotStatus::Active => "active",
            SlotStatus::Superseded => "superseded",
            SlotStatus::Retracted => "retracted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SlotStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SlotStatus::Active),
            "superseded" => Ok(SlotStatus::Superseded),
            "retracted" => Ok(SlotStatus::Retracted),
            other => Err(format!("unknown slot status: {other}")),
        }
    }
}

/// Per `(project, subject, slot)` winner record. Primary key is the triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotState {
    pub project_id: String,
    pub subject_id: String,
    pub slot: String,
    pub active_claim_id: Option<ClaimId>,
    pub status: SlotStatus,
    pub replaced_by_claim_id: Option<ClaimId>,
    pub updated_at: DateTime<Utc>,
}

/// Audit row for a memory surfaced in a recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecallEvent {
    pub recall_id: String,
    pub project_id: String,
    pub memory_id: MemoryId,
    pub subject_id: String,
    pub chat_id: String,
    pub message_index: i64,
    pub similarity_score: f64,
    pub request_type: String,
    pub model_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate statistics over recall events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallStats {
    pub count: i64,
    pub distinct_chats: i64,
    pub distinct_subjects: i64,
    pub average_score: f64,
    pub min_created_at: Option<DateTime<Utc>>,
    pub max_created_at: Option<DateTime<Utc>>,
}

/// Clamp an `i32` into `[lo, hi]`.
pub fn clamp_i32(v: i32, lo: i32, hi: i32) -> i32 {
    v.max(lo).min(hi)
}

/// Clamp an `f64` into `[lo, hi]`.
pub fn clamp_f64(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

/// Pack an embedding vector into a little-endian byte blob for storage.
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

/// Unpack a little-endian byte blob back into an embedding vector.
pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Collapse internal whitespace runs to a single space and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for c in s.trim().chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

/// Truncate a string to at most `max` chars (UTF-8 safe).
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Free-form metadata map alias used at a few call sites for readability.
pub type Metadata = HashMap<String, serde_json::Value>;

// --- Storage-facade request/response shapes --------------------------------

/// Input to `StorageBackend::create_memory`; defaults are applied by the
/// storage layer, not the caller.
#[derive(Debug, Clone, Default)]
pub struct CreateMemoryInput {
    pub id: Option<MemoryId>,
    pub project_id: String,
    pub subject_id: String,
    pub text: String,
    pub kind: Option<MemoryKind>,
    pub visibility: Option<Visibility>,
    pub importance: Option<i32>,
    pub confidence: Option<f64>,
    pub is_temporal: Option<bool>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
    pub source_type: Option<String>,
}

/// Patch applied by `StorageBackend::update_memory`; `None` leaves a field
/// unchanged, matching PATCH semantics.
#[derive(Debug, Clone, Default)]
pub struct UpdateMemoryInput {
    pub text: Option<String>,
    pub kind: Option<MemoryKind>,
    pub visibility: Option<Visibility>,
    pub importance: Option<i32>,
    pub confidence: Option<f64>,
    pub is_temporal: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub embedding: Option<Option<Vec<f32>>>,
}

/// Options for `StorageBackend::list_memories`.
#[derive(Debug, Clone)]
pub struct ListMemoriesOptions {
    pub limit: i64,
    pub offset: i64,
    pub include_deleted: bool,
    pub include_superseded: bool,
}

impl Default for ListMemoriesOptions {
    fn default() -> Self {
        Self {
            limit: 25,
            offset: 0,
            include_deleted: false,
            include_superseded: false,
        }
    }
}

/// Query for `StorageBackend::search_memories`.
#[derive(Debug, Clone, Default)]
pub struct SearchMemoriesQuery {
    pub q: String,
    pub query_embedding: Option<Vec<f32>>,
    pub limit: i64,
    pub min_score: f64,
}

/// Input to `StorageBackend::create_claim`.
#[derive(Debug, Clone)]
pub struct CreateClaimInput {
    pub claim_id: Option<ClaimId>,
    pub project_id: String,
    pub subject_id: String,
    pub predicate: String,
    pub object_value: String,
    pub slot: Option<String>,
    pub claim_type: Option<String>,
    pub confidence: Option<f64>,
    pub importance: Option<f64>,
    pub tags: Vec<String>,
    pub source_memory_id: Option<MemoryId>,
    pub subject_entity: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// Outcome of a claim create.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimCreateOutcome {
    pub claim: Claim,
}

/// Outcome of a claim retraction.
#[derive(Debug, Clone, Serialize)]
pub struct RetractOutcome {
    pub success: bool,
    pub claim_id: ClaimId,
    pub slot: Option<String>,
    pub previous_claim_id: Option<ClaimId>,
    pub restored_previous: bool,
}

/// A resolved slot view, optionally carrying the winning claim (see
/// `GetCurrentTruth`/`GetCurrentSlot`).
#[derive(Debug, Clone, Serialize)]
pub struct SlotSnapshot {
    pub slot: SlotState,
    pub claim: Option<Claim>,
}

/// Claims grouped by their slot status.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SlotsGrouped {
    pub active: Vec<SlotSnapshot>,
    pub superseded: Vec<SlotSnapshot>,
    pub other: Vec<SlotSnapshot>,
}

/// Claims + edges + an edge-type histogram for a subject.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ClaimGraph {
    pub claims: Vec<Claim>,
    pub edges: Vec<ClaimEdge>,
    pub edge_type_counts: HashMap<String, i64>,
}

/// A subject's claim history: claims grouped by slot, plus the
/// `supersedes` edges between them.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ClaimHistory {
    pub slots: HashMap<String, Vec<Claim>>,
    pub supersedes_edges: Vec<ClaimEdge>,
}

/// A claim plus its evidence assertions, as seen from one source memory.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimWithAssertions {
    pub claim: Claim,
    pub assertions: Vec<ClaimAssertion>,
}

/// Single-claim detail view: the claim, its assertions, and its
/// `supersedes`-typed edges.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimDetail {
    pub claim: Claim,
    pub assertions: Vec<ClaimAssertion>,
    pub supersedes_edges: Vec<ClaimEdge>,
}

/// A new recall-event row to append.
#[derive(Debug, Clone)]
pub struct NewRecallEvent {
    pub project_id: String,
    pub memory_id: MemoryId,
    pub subject_id: String,
    pub chat_id: String,
    pub message_index: i64,
    pub similarity_score: f64,
    pub request_type: String,
    pub model_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_claim_type_rules() {
        assert_eq!(infer_claim_type("favorite_color"), "preference");
        assert_eq!(infer_claim_type("likes_food"), "preference");
        assert_eq!(infer_claim_type("wants_promotion"), "goal");
        assert_eq!(infer_claim_type("career_goal"), "goal");
        assert_eq!(infer_claim_type("did_deploy"), "event");
        assert_eq!(infer_claim_type("event_launch"), "event");
        assert_eq!(infer_claim_type("name"), "fact");
    }

    #[test]
    fn embedding_blob_roundtrip() {
        let v = vec![1.0f32, -2.5, 0.0, 3.25];
        let blob = embedding_to_blob(&v);
        let back = blob_to_embedding(&blob);
        assert_eq!(v, back);
    }

    #[test]
    fn whitespace_collapse() {
        assert_eq!(collapse_whitespace("  a   b\tc\n\nd  "), "a b c d");
    }

    #[test]
    fn clamp_helpers() {
        assert_eq!(clamp_i32(-5, 0, 100), 0);
        assert_eq!(clamp_i32(500, 0, 100), 100);
        assert_eq!(clamp_i32(50, 0, 100), 50);
        assert!((clamp_f64(1.5, 0.0, 1.0) - 1.0).abs() < 1e-9);
    }
}
