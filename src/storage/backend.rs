//! Storage facade trait: typed operations against persistent state,
//! abstracting query and index details from the orchestrators.

use crate::error::Result;
use crate::types::{
    Claim, ClaimDetail, ClaimGraph, ClaimHistory, ClaimWithAssertions, CreateClaimInput, CreateMemoryInput,
    ListMemoriesOptions, Memory, MemoryId, MemoryRecallEvent, NewRecallEvent, RecallStats, RetractOutcome,
    ScoredMemory, SearchMemoriesQuery, SlotSnapshot, SlotsGrouped, UpdateMemoryInput,
};

/// Outcome of `restore_memory`: the orchestrator maps `NotFound` to 404,
/// `Deleted` to 400, and the other two to 200.
#[derive(Debug, Clone)]
pub enum RestoreOutcome {
    NotFound,
    Deleted,
    AlreadyActive(Memory),
    Restored(Memory),
}

/// Health status of the storage backend.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: f64,
    pub error: Option<String>,
}

/// The single capability interface through which orchestrators and the
/// retrieval service touch persistent state. All operations take explicit
/// `project_id` (and usually `subject_id`) and are `Send + Sync` so a single
/// `Arc<dyn StorageBackend>` can be shared across request handlers.
pub trait StorageBackend: Send + Sync {
    fn create_memory(&self, input: CreateMemoryInput) -> Result<Memory>;
    fn get_memory(&self, project_id: &str, id: &str) -> Result<Option<Memory>>;
    fn update_memory(&self, project_id: &str, id: &str, patch: UpdateMemoryInput) -> Result<Option<Memory>>;
    /// Soft-delete. Returns `true` only if the row actually transitioned.
    fn delete_memory(&self, project_id: &str, id: &str) -> Result<bool>;
    fn restore_memory(&self, project_id: &str, id: &str) -> Result<RestoreOutcome>;

    fn list_memories(&self, project_id: &str, subject_id: &str, options: ListMemoriesOptions) -> Result<Vec<Memory>>;
    fn list_superseded_memories(&self, project_id: &str, subject_id: &str, limit: i64, offset: i64) -> Result<Vec<Memory>>;
    fn search_memories(&self, project_id: &str, subject_id: &str, query: &SearchMemoriesQuery) -> Result<Vec<ScoredMemory>>;

    /// Most-similar active, non-deleted memory at or above `threshold` (×100
    /// cosine), or `None` if nothing qualifies.
    fn find_duplicate_memory(
        &self,
        project_id: &str,
        subject_id: &str,
        embedding: &[f32],
        threshold: f64,
    ) -> Result<Option<Memory>>;

    /// Active, non-deleted memories in the half-open similarity band
    /// `[min_sim, max_sim)`, ordered by similarity descending.
    fn find_conflicting_memories(
        &self,
        project_id: &str,
        subject_id: &str,
        embedding: &[f32],
        min_sim: f64,
        max_sim: f64,
        limit: i64,
    ) -> Result<Vec<Memory>>;

    /// Bulk-transition active rows to `status='superseded'`. Returns the
    /// number of rows actually transitioned.
    fn supersede_memories(&self, project_id: &str, ids: &[MemoryId], superseded_by: &str) -> Result<usize>;

    /// Atomic claim create + slot promotion.
    fn create_claim(&self, input: CreateClaimInput) -> Result<Claim>;
    /// Atomic claim retract + previous-winner restoration + edge write.
    fn retract_claim(&self, project_id: &str, claim_id: &str, reason: Option<String>) -> Result<RetractOutcome>;
    fn get_claim(&self, project_id: &str, claim_id: &str) -> Result<Option<Claim>>;
    /// Claims sourced from one memory, each with its evidence assertions.
    fn claims_for_memory(&self, project_id: &str, memory_id: &str) -> Result<Vec<ClaimWithAssertions>>;
    /// Claim + assertions + `supersedes` edges.
    fn get_claim_detail(&self, project_id: &str, claim_id: &str) -> Result<Option<ClaimDetail>>;

    fn get_current_truth(&self, project_id: &str, subject_id: &str) -> Result<Vec<SlotSnapshot>>;
    fn get_current_slot(&self, project_id: &str, subject_id: &str, slot: &str) -> Result<Option<SlotSnapshot>>;
    fn get_slots(&self, project_id: &str, subject_id: &str, limit: i64) -> Result<SlotsGrouped>;
    fn get_claim_graph(&self, project_id: &str, subject_id: &str, limit: i64) -> Result<ClaimGraph>;
    fn get_claim_history(&self, project_id: &str, subject_id: &str, slot: Option<&str>, limit: i64) -> Result<ClaimHistory>;

    fn record_recall_event(&self, event: NewRecallEvent) -> Result<MemoryRecallEvent>;
    fn recall_events_by_chat(&self, project_id: &str, chat_id: &str, limit: i64) -> Result<Vec<MemoryRecallEvent>>;
    fn recall_events_by_memory(&self, project_id: &str, memory_id: &str, limit: i64) -> Result<Vec<MemoryRecallEvent>>;
    fn recall_stats(&self, project_id: &str) -> Result<RecallStats>;

    fn health_check(&self) -> Result<HealthStatus>;
}
