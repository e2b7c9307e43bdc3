//! Claim orchestrator: a thin layer over the storage-layer atomic
//! create/retract mechanics. Unlike the memory orchestrator this has
//! no duplicate/conflict detection or async side effects — claim mutation is
//! already a single transaction in `storage::queries`.

use crate::error::Result;
use crate::storage::StorageBackend;
use crate::types::{Claim, CreateClaimInput, RetractOutcome};

/// Create a claim and upsert its slot. Promotion is unconditional
/// last-writer-wins (see DESIGN.md); this does not retract any sibling
/// claim in the slot.
pub fn create_claim(storage: &dyn StorageBackend, input: CreateClaimInput) -> Result<Claim> {
    storage.create_claim(input)
}

/// Retract a claim, restoring the previous active claim in its slot if one
/// exists. A retract of an already-retracted or missing claim is a no-op
/// (`success: false`).
pub fn retract_claim(
    storage: &dyn StorageBackend,
    project_id: &str,
    claim_id: &str,
    reason: Option<String>,
) -> Result<RetractOutcome> {
    storage.retract_claim(project_id, claim_id, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteBackend, Storage};

    fn backend() -> SqliteBackend {
        SqliteBackend::new(Storage::open_in_memory().unwrap())
    }

    #[test]
    fn create_then_retract_round_trips() {
        let backend = backend();
        let input = CreateClaimInput {
            claim_id: None,
            project_id: "proj".to_string(),
            subject_id: "user_1".to_string(),
            predicate: "favorite_color".to_string(),
            object_value: "blue".to_string(),
            slot: None,
            claim_type: None,
            confidence: None,
            importance: None,
            tags: vec![],
            source_memory_id: None,
            subject_entity: None,
            embedding: None,
        };
        let claim = create_claim(&backend, input).unwrap();
        let outcome = retract_claim(&backend, "proj", &claim.claim_id, None).unwrap();
        assert!(outcome.success);
        assert!(!outcome.restored_previous);
    }
}
