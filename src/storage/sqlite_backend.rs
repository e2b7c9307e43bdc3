//! SQLite implementation of [`StorageBackend`].

use crate::error::Result;
use crate::types::{
    Claim, ClaimDetail, ClaimGraph, ClaimHistory, ClaimWithAssertions, CreateClaimInput, CreateMemoryInput,
    ListMemoriesOptions, Memory, MemoryId, MemoryRecallEvent, NewRecallEvent, RecallStats, RetractOutcome,
    ScoredMemory, SearchMemoriesQuery, SlotSnapshot, SlotsGrouped, UpdateMemoryInput,
};

use super::backend::{HealthStatus, RestoreOutcome, StorageBackend};
use super::connection::Storage;
use super::queries;

pub struct SqliteBackend {
    storage: Storage,
}

impl SqliteBackend {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

impl StorageBackend for SqliteBackend {
    fn create_memory(&self, input: CreateMemoryInput) -> Result<Memory> {
        self.storage.with_connection(|conn| queries::create_memory(conn, input))
    }

    fn get_memory(&self, project_id: &str, id: &str) -> Result<Option<Memory>> {
        self.storage.with_connection(|conn| queries::get_memory(conn, project_id, id))
    }

    fn update_memory(&self, project_id: &str, id: &str, patch: UpdateMemoryInput) -> Result<Option<Memory>> {
        self.storage
            .with_connection(|conn| queries::update_memory(conn, project_id, id, patch))
    }

    fn delete_memory(&self, project_id: &str, id: &str) -> Result<bool> {
        self.storage.with_connection(|conn| queries::delete_memory(conn, project_id, id))
    }

    fn restore_memory(&self, project_id: &str, id: &str) -> Result<RestoreOutcome> {
        self.storage.with_connection(|conn| queries::restore_memory(conn, project_id, id))
    }

    fn list_memories(&self, project_id: &str, subject_id: &str, options: ListMemoriesOptions) -> Result<Vec<Memory>> {
        self.storage
            .with_connection(|conn| queries::list_memories(conn, project_id, subject_id, options))
    }

    fn list_superseded_memories(&self, project_id: &str, subject_id: &str, limit: i64, offset: i64) -> Result<Vec<Memory>> {
        self.storage
            .with_connection(|conn| queries::list_superseded_memories(conn, project_id, subject_id, limit, offset))
    }

    fn search_memories(&self, project_id: &str, subject_id: &str, query: &SearchMemoriesQuery) -> Result<Vec<ScoredMemory>> {
        self.storage
            .with_connection(|conn| queries::search_memories(conn, project_id, subject_id, query))
    }

    fn find_duplicate_memory(
        &self,
        project_id: &str,
        subject_id: &str,
        embedding: &[f32],
        threshold: f64,
    ) -> Result<Option<Memory>> {
        self.storage
            .with_connection(|conn| queries::find_duplicate_memory(conn, project_id, subject_id, embedding, threshold))
    }

    fn find_conflicting_memories(
        &self,
        project_id: &str,
        subject_id: &str,
        embedding: &[f32],
        min_sim: f64,
        max_sim: f64,
        limit: i64,
    ) -> Result<Vec<Memory>> {
        self.storage.with_connection(|conn| {
            queries::find_conflicting_memories(conn, project_id, subject_id, embedding, min_sim, max_sim, limit)
        })
    }

    fn supersede_memories(&self, project_id: &str, ids: &[MemoryId], superseded_by: &str) -> Result<usize> {
        self.storage
            .with_connection(|conn| queries::supersede_memories(conn, project_id, ids, superseded_by))
    }

    fn create_claim(&self, input: CreateClaimInput) -> Result<Claim> {
        self.storage.with_transaction(|tx| queries::create_claim(tx, input))
    }

    fn retract_claim(&self, project_id: &str, claim_id: &str, reason: Option<String>) -> Result<RetractOutcome> {
        self.storage
            .with_transaction(|tx| queries::retract_claim(tx, project_id, claim_id, reason))
    }

    fn get_claim(&self, project_id: &str, claim_id: &str) -> Result<Option<Claim>> {
        self.storage.with_connection(|conn| queries::get_claim(conn, project_id, claim_id))
    }

    fn claims_for_memory(&self, project_id: &str, memory_id: &str) -> Result<Vec<ClaimWithAssertions>> {
        self.storage
            .with_connection(|conn| queries::claims_for_memory(conn, project_id, memory_id))
    }

    fn get_claim_detail(&self, project_id: &str, claim_id: &str) -> Result<Option<ClaimDetail>> {
        self.storage
            .with_connection(|conn| queries::get_claim_detail(conn, project_id, claim_id))
    }

    fn get_current_truth(&self, project_id: &str, subject_id: &str) -> Result<Vec<SlotSnapshot>> {
        self.storage
            .with_connection(|conn| queries::get_current_truth(conn, project_id, subject_id))
    }

    fn get_current_slot(&self, project_id: &str, subject_id: &str, slot: &str) -> Result<Option<SlotSnapshot>> {
        self.storage
            .with_connection(|conn| queries::get_current_slot(conn, project_id, subject_id, slot))
    }

    fn get_slots(&self, project_id: &str, subject_id: &str, limit: i64) -> Result<SlotsGrouped> {
        self.storage.with_connection(|conn| queries::get_slots(conn, project_id, subject_id, limit))
    }

    fn get_claim_graph(&self, project_id: &str, subject_id: &str, limit: i64) -> Result<ClaimGraph> {
        self.storage
            .with_connection(|conn| queries::get_claim_graph(conn, project_id, subject_id, limit))
    }

    fn get_claim_history(&self, project_id: &str, subject_id: &str, slot: Option<&str>, limit: i64) -> Result<ClaimHistory> {
        self.storage
            .with_connection(|conn| queries::get_claim_history(conn, project_id, subject_id, slot, limit))
    }

    fn record_recall_event(&self, event: NewRecallEvent) -> Result<MemoryRecallEvent> {
        self.storage.with_connection(|conn| queries::record_recall_event(conn, event))
    }

    fn recall_events_by_chat(&self, project_id: &str, chat_id: &str, limit: i64) -> Result<Vec<MemoryRecallEvent>> {
        self.storage
            .with_connection(|conn| queries::recall_events_by_chat(conn, project_id, chat_id, limit))
    }

    fn recall_events_by_memory(&self, project_id: &str, memory_id: &str, limit: i64) -> Result<Vec<MemoryRecallEvent>> {
        self.storage
            .with_connection(|conn| queries::recall_events_by_memory(conn, project_id, memory_id, limit))
    }

    fn recall_stats(&self, project_id: &str) -> Result<RecallStats> {
        self.storage.with_connection(|conn| queries::recall_stats(conn, project_id))
    }

    fn health_check(&self) -> Result<HealthStatus> {
        self.storage.with_connection(queries::health_check)
    }
}
