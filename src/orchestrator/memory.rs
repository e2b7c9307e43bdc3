//! Memory orchestrator: ties memory create/patch/delete/restore to
//! duplicate/conflict detection, embedding, event emission, and detached
//! claim extraction.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embedding::Embedder;
use crate::error::{AppError, Result};
use crate::events::{EventBus, EventType};
use crate::extraction::{self, ExtractionInput};
use crate::llm::LlmClient;
use crate::storage::{RestoreOutcome, StorageBackend};
use crate::types::{
    CreateClaimInput, CreateMemoryInput, Memory, MemoryKind, MemoryId, UpdateMemoryInput, Visibility,
};

use super::claim;

const TEXT_MAX_LEN: usize = 10_000;
const DUPLICATE_THRESHOLD: f64 = 85.0;
const CONFLICT_MIN: f64 = 60.0;
const CONFLICT_MAX: f64 = 85.0;
const CONFLICT_LIMIT: i64 = 50;
const EXTRACTED_CLAIM_CAP: usize = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMemoryRequest {
    pub id: Option<MemoryId>,
    pub subject_id: String,
    pub text: String,
    pub kind: Option<MemoryKind>,
    pub visibility: Option<Visibility>,
    pub importance: Option<i32>,
    pub confidence: Option<f64>,
    pub is_temporal: Option<bool>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub source_type: Option<String>,
    #[serde(default)]
    pub no_supersede: bool,
    #[serde(default = "default_true")]
    pub extract_claims: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CreateMemoryOutcome {
    Skipped {
        id: Option<MemoryId>,
        created: bool,
        skipped: bool,
        reason: &'static str,
    },
    Created {
        id: MemoryId,
        subject_id: String,
        text: String,
        kind: MemoryKind,
        created: bool,
        superseded_count: usize,
        superseded_ids: Vec<MemoryId>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatchMemoryRequest {
    pub text: Option<String>,
    pub kind: Option<MemoryKind>,
    pub visibility: Option<Visibility>,
    pub importance: Option<i32>,
    pub confidence: Option<f64>,
    pub is_temporal: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
    pub restored: bool,
    pub memory: Memory,
}

/// Owns the capabilities a memory write needs: storage, embedder, LLM
/// (for detached extraction), and the event bus.
#[derive(Clone)]
pub struct MemoryOrchestrator {
    storage: Arc<dyn StorageBackend>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LlmClient>,
    events: EventBus,
}

impl MemoryOrchestrator {
    pub fn new(storage: Arc<dyn StorageBackend>, embedder: Arc<dyn Embedder>, llm: Arc<dyn LlmClient>, events: EventBus) -> Self {
        Self { storage, embedder, llm, events }
    }

    pub async fn create(&self, project_id: &str, req: CreateMemoryRequest) -> Result<CreateMemoryOutcome> {
        if req.subject_id.trim().is_empty() {
            return Err(AppError::invalid("subject_id_required"));
        }
        if req.text.trim().is_empty() {
            return Err(AppError::invalid("text_required"));
        }
        if req.text.chars().count() > TEXT_MAX_LEN {
            return Err(AppError::invalid("text_too_long"));
        }

        let embedding = self.embedder.embed(&req.text).await;
        let embedding = if embedding.is_empty() { None } else { Some(embedding) };

        if let Some(embedding) = &embedding {
            if !req.no_supersede {
                let duplicate = self
                    .storage
                    .find_duplicate_memory(project_id, &req.subject_id, embedding, DUPLICATE_THRESHOLD)?;
                if duplicate.is_some() {
                    return Ok(CreateMemoryOutcome::Skipped { id: None, created: false, skipped: true, reason: "duplicate" });
                }
            }
        }

        let conflicting = match (&embedding, req.no_supersede) {
            (Some(embedding), false) => {
                self.storage
                    .find_conflicting_memories(project_id, &req.subject_id, embedding, CONFLICT_MIN, CONFLICT_MAX, CONFLICT_LIMIT)?
            }
            _ => Vec::new(),
        };
        let conflicting_ids: Vec<MemoryId> = conflicting.iter().map(|m| m.id.clone()).collect();

        let input = CreateMemoryInput {
            id: req.id.clone(),
            project_id: project_id.to_string(),
            subject_id: req.subject_id.clone(),
            text: req.text.clone(),
            kind: req.kind,
            visibility: req.visibility,
            importance: req.importance,
            confidence: req.confidence,
            is_temporal: req.is_temporal,
            tags: req.tags.clone(),
            metadata: req.metadata.clone(),
            embedding,
            source_type: req.source_type.clone(),
        };
        let memory = self.storage.create_memory(input)?;

        let superseded_count = if conflicting_ids.is_empty() {
            0
        } else {
            self.storage.supersede_memories(project_id, &conflicting_ids, &memory.id)?
        };

        self.events.emit(
            project_id,
            Some(&memory.subject_id),
            EventType::MemoryCreated,
            serde_json::json!({
                "id": memory.id,
                "subject_id": memory.subject_id,
                "text": memory.text,
                "kind": memory.kind,
                "visibility": memory.visibility,
                "importance": memory.importance,
                "tags": memory.tags,
                "created_at": memory.created_at,
            }),
        );

        for superseded_id in &conflicting_ids {
            self.events.emit(
                project_id,
                Some(&memory.subject_id),
                EventType::MemorySuperseded,
                serde_json::json!({"id": superseded_id, "superseded_by": memory.id}),
            );
        }

        if req.extract_claims && !req.no_supersede {
            self.spawn_extraction(project_id, &memory);
        }

        Ok(CreateMemoryOutcome::Created {
            id: memory.id,
            subject_id: memory.subject_id,
            text: memory.text,
            kind: memory.kind,
            created: true,
            superseded_count,
            superseded_ids: conflicting_ids,
        })
    }

    fn spawn_extraction(&self, project_id: &str, memory: &Memory) {
        let storage = self.storage.clone();
        let llm = self.llm.clone();
        let embedder = self.embedder.clone();
        let project_id = project_id.to_string();
        let subject_id = memory.subject_id.clone();
        let memory_id = memory.id.clone();
        let text = memory.text.clone();

        tokio::spawn(async move {
            let input = ExtractionInput { text, force: true, conversation_context: Vec::new() };
            let result = extraction::extract(llm.as_ref(), &input).await;

            let mut seen = HashSet::new();
            let mut to_create = Vec::new();
            for extracted_memory in &result.memories {
                for claim in &extracted_memory.claims {
                    let key = (claim.predicate.clone(), claim.object_value.to_lowercase());
                    if seen.insert(key) {
                        to_create.push(claim.clone());
                        if to_create.len() >= EXTRACTED_CLAIM_CAP {
                            break;
                        }
                    }
                }
                if to_create.len() >= EXTRACTED_CLAIM_CAP {
                    break;
                }
            }

            for extracted in to_create {
                let embedding_text = format!("{}: {}", extracted.predicate, extracted.object_value);
                let embedding = embedder.embed(&embedding_text).await;
                let input = CreateClaimInput {
                    claim_id: None,
                    project_id: project_id.clone(),
                    subject_id: subject_id.clone(),
                    predicate: extracted.predicate.clone(),
                    object_value: extracted.object_value.clone(),
                    slot: None,
                    claim_type: Some(extracted.claim_type.clone()),
                    confidence: Some(extracted.confidence),
                    importance: None,
                    tags: Vec::new(),
                    source_memory_id: Some(memory_id.clone()),
                    subject_entity: None,
                    embedding: if embedding.is_empty() { None } else { Some(embedding) },
                };
                if let Err(e) = claim::create_claim(storage.as_ref(), input) {
                    tracing::warn!(error = %e, memory_id = %memory_id, predicate = %extracted.predicate, "claim extraction write failed");
                }
            }
        });
    }

    pub async fn patch(&self, project_id: &str, id: &str, patch: PatchMemoryRequest) -> Result<Memory> {
        let existing = self.storage.get_memory(project_id, id)?;
        match &existing {
            None => return Err(AppError::NotFound("memory_not_found")),
            Some(m) if m.is_deleted => return Err(AppError::NotFound("memory_not_found")),
            _ => {}
        }

        let mut embedding_update = None;
        if let Some(text) = &patch.text {
            let embedding = self.embedder.embed(text).await;
            embedding_update = Some(if embedding.is_empty() { None } else { Some(embedding) });
        }

        let update = UpdateMemoryInput {
            text: patch.text,
            kind: patch.kind,
            visibility: patch.visibility,
            importance: patch.importance,
            confidence: patch.confidence,
            is_temporal: patch.is_temporal,
            tags: patch.tags,
            metadata: patch.metadata,
            embedding: embedding_update,
        };

        let memory = self
            .storage
            .update_memory(project_id, id, update)?
            .ok_or(AppError::NotFound("memory_not_found"))?;

        self.events.emit(
            project_id,
            Some(&memory.subject_id),
            EventType::MemoryUpdated,
            serde_json::json!({"id": memory.id, "subject_id": memory.subject_id, "status": memory.status}),
        );

        Ok(memory)
    }

    pub fn delete(&self, project_id: &str, id: &str) -> Result<bool> {
        let existing = self.storage.get_memory(project_id, id)?;
        let transitioned = self.storage.delete_memory(project_id, id)?;
        if transitioned {
            if let Some(memory) = existing {
                self.events.emit(project_id, Some(&memory.subject_id), EventType::MemoryDeleted, serde_json::json!({"id": id}));
            }
        }
        Ok(transitioned)
    }

    pub fn restore(&self, project_id: &str, id: &str) -> Result<RestoreResult> {
        match self.storage.restore_memory(project_id, id)? {
            RestoreOutcome::NotFound => Err(AppError::NotFound("memory_not_found")),
            RestoreOutcome::Deleted => Err(AppError::MemoryDeleted),
            RestoreOutcome::AlreadyActive(memory) => Ok(RestoreResult { restored: false, memory }),
            RestoreOutcome::Restored(memory) => {
                self.events.emit(
                    project_id,
                    Some(&memory.subject_id),
                    EventType::MemoryUpdated,
                    serde_json::json!({"id": memory.id, "subject_id": memory.subject_id, "status": memory.status}),
                );
                Ok(RestoreResult { restored: true, memory })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::NullEmbedder;
    use crate::llm::NullLlmClient;
    use crate::storage::{SqliteBackend, Storage};

    fn orchestrator() -> MemoryOrchestrator {
        let storage = SqliteBackend::new(Storage::open_in_memory().unwrap());
        MemoryOrchestrator::new(
            Arc::new(storage),
            Arc::new(NullEmbedder::new(8)),
            Arc::new(NullLlmClient),
            EventBus::new(),
        )
    }

    #[tokio::test]
    async fn create_requires_subject_and_text() {
        let orchestrator = orchestrator();
        let req = CreateMemoryRequest {
            id: None,
            subject_id: String::new(),
            text: "hello".to_string(),
            kind: None,
            visibility: None,
            importance: None,
            confidence: None,
            is_temporal: None,
            tags: vec![],
            metadata: serde_json::Value::Null,
            source_type: None,
            no_supersede: false,
            extract_claims: false,
        };
        let err = orchestrator.create("proj", req).await.unwrap_err();
        assert!(matches!(err, AppError::Validation("subject_id_required")));
    }

    #[tokio::test]
    async fn create_without_embedding_always_creates() {
        let orchestrator = orchestrator();
        let req = CreateMemoryRequest {
            id: None,
            subject_id: "user_1".to_string(),
            text: "likes tea".to_string(),
            kind: None,
            visibility: None,
            importance: None,
            confidence: None,
            is_temporal: None,
            tags: vec![],
            metadata: serde_json::Value::Null,
            source_type: None,
            no_supersede: false,
            extract_claims: false,
        };
        let outcome = orchestrator.create("proj", req).await.unwrap();
        match outcome {
            CreateMemoryOutcome::Created { created, .. } => assert!(created),
            CreateMemoryOutcome::Skipped { .. } => panic!("expected Created"),
        }
    }

    #[tokio::test]
    async fn patch_missing_memory_is_not_found() {
        let orchestrator = orchestrator();
        let err = orchestrator.patch("proj", "mem_missing", PatchMemoryRequest::default()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("memory_not_found")));
    }

    #[tokio::test]
    async fn restore_missing_memory_is_not_found() {
        let orchestrator = orchestrator();
        let err = orchestrator.restore("proj", "mem_missing").unwrap_err();
        assert!(matches!(err, AppError::NotFound("memory_not_found")));
    }
}
