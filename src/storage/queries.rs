//! Free-function query implementations backing [`super::sqlite_backend::SqliteBackend`].
//!
//! Every function takes a `&Connection` (a `rusqlite::Transaction` derefs to
//! one, so the claim-write functions below compose inside
//! [`super::connection::Storage::with_transaction`]).

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::embedding::cosine_similarity;
use crate::error::AppError;
use crate::error::Result;
use crate::storage::backend::{HealthStatus, RestoreOutcome};
use crate::types::{
    blob_to_embedding, clamp_f64, clamp_i32, embedding_to_blob, new_id, Claim, ClaimEdge,
    ClaimGraph, ClaimHistory, ClaimStatus, CreateClaimInput, CreateMemoryInput, EdgeType,
    ListMemoriesOptions, Memory, MemoryKind, MemoryRecallEvent, MemoryStatus, NewRecallEvent,
    RecallStats, RetractOutcome, ScoredMemory, SearchMemoriesQuery, SlotSnapshot, SlotState,
    SlotStatus, SlotsGrouped, UpdateMemoryInput, Visibility,
};

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "does", "for", "from", "how", "i",
    "in", "is", "it", "me", "my", "of", "on", "or", "our", "personal", "preference",
    "preferences", "the", "to", "user", "users", "what", "where", "who", "why", "you", "your",
];

/// Lowercase, strip non-alphanumerics, split, drop short/stop tokens, dedupe,
/// keep the first 10.
fn tokenize(q: &str) -> Vec<String> {
    let lowered = q.to_lowercase();
    let mut seen = std::collections::HashSet::new();
    let mut tokens = Vec::new();
    for raw in lowered.split_whitespace() {
        let cleaned: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
        if cleaned.chars().count() < 2 || STOP_WORDS.contains(&cleaned.as_str()) {
            continue;
        }
        if seen.insert(cleaned.clone()) {
            tokens.push(cleaned);
        }
        if tokens.len() == 10 {
            break;
        }
    }
    tokens
}

fn row_to_memory(row: &Row) -> rusqlite::Result<Memory> {
    let tags_json: String = row.get("tags")?;
    let metadata_json: String = row.get("metadata")?;
    let embedding_blob: Option<Vec<u8>> = row.get("embedding")?;
    let kind_str: String = row.get("kind")?;
    let visibility_str: String = row.get("visibility")?;
    let status_str: String = row.get("status")?;

    Ok(Memory {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        subject_id: row.get("subject_id")?,
        text: row.get("text")?,
        kind: serde_json::from_value(serde_json::Value::String(kind_str)).unwrap_or(MemoryKind::Fact),
        visibility: serde_json::from_value(serde_json::Value::String(visibility_str))
            .unwrap_or(Visibility::Private),
        importance: row.get("importance")?,
        confidence: row.get("confidence")?,
        is_temporal: row.get::<_, i64>("is_temporal")? != 0,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null),
        embedding: embedding_blob.map(|b| blob_to_embedding(&b)),
        status: status_str.parse().unwrap_or(MemoryStatus::Active),
        superseded_by: row.get("superseded_by")?,
        is_deleted: row.get::<_, i64>("is_deleted")? != 0,
        source_type: row.get("source_type")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        last_reinforced_at: row.get("last_reinforced_at")?,
    })
}

fn row_to_claim(row: &Row) -> rusqlite::Result<Claim> {
    let tags_json: String = row.get("tags")?;
    let status_str: String = row.get("status")?;
    let embedding_blob: Option<Vec<u8>> = row.get("embedding")?;

    Ok(Claim {
        claim_id: row.get("claim_id")?,
        project_id: row.get("project_id")?,
        subject_id: row.get("subject_id")?,
        predicate: row.get("predicate")?,
        object_value: row.get("object_value")?,
        slot: row.get("slot")?,
        claim_type: row.get("claim_type")?,
        confidence: row.get("confidence")?,
        importance: row.get("importance")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        source_memory_id: row.get("source_memory_id")?,
        subject_entity: row.get("subject_entity")?,
        status: status_str.parse().unwrap_or(ClaimStatus::Active),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        valid_from: row.get("valid_from")?,
        valid_until: row.get("valid_until")?,
        retracted_at: row.get("retracted_at")?,
        retract_reason: row.get("retract_reason")?,
        embedding: embedding_blob.map(|b| blob_to_embedding(&b)),
    })
}

fn row_to_edge(row: &Row) -> rusqlite::Result<ClaimEdge> {
    let edge_type_str: String = row.get("edge_type")?;
    Ok(ClaimEdge {
        edge_id: row.get("edge_id")?,
        project_id: row.get("project_id")?,
        from_claim_id: row.get("from_claim_id")?,
        to_claim_id: row.get("to_claim_id")?,
        edge_type: edge_type_str.parse().unwrap_or(EdgeType::Related),
        weight: row.get("weight")?,
        reason_code: row.get("reason_code")?,
        reason_text: row.get("reason_text")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_slot(row: &Row) -> rusqlite::Result<SlotState> {
    let status_str: String = row.get("status")?;
    Ok(SlotState {
        project_id: row.get("project_id")?,
        subject_id: row.get("subject_id")?,
        slot: row.get("slot")?,
        active_claim_id: row.get("active_claim_id")?,
        status: status_str.parse().unwrap_or(SlotStatus::Active),
        replaced_by_claim_id: row.get("replaced_by_claim_id")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_recall(row: &Row) -> rusqlite::Result<MemoryRecallEvent> {
    Ok(MemoryRecallEvent {
        recall_id: row.get("recall_id")?,
        project_id: row.get("project_id")?,
        memory_id: row.get("memory_id")?,
        subject_id: row.get("subject_id")?,
        chat_id: row.get("chat_id")?,
        message_index: row.get("message_index")?,
        similarity_score: row.get("similarity_score")?,
        request_type: row.get("request_type")?,
        model_id: row.get("model_id")?,
        created_at: row.get("created_at")?,
    })
}

// --- Memories ---------------------------------------------------------

pub fn create_memory(conn: &Connection, input: CreateMemoryInput) -> Result<Memory> {
    let id = input.id.unwrap_or_else(|| new_id("mem"));
    let now = Utc::now();
    let memory = Memory {
        id: id.clone(),
        project_id: input.project_id,
        subject_id: input.subject_id,
        text: input.text,
        kind: input.kind.unwrap_or_default(),
        visibility: input.visibility.unwrap_or_default(),
        importance: clamp_i32(input.importance.unwrap_or(50), 0, 100),
        confidence: clamp_f64(input.confidence.unwrap_or(0.95), 0.0, 1.0),
        is_temporal: input.is_temporal.unwrap_or(false),
        tags: input.tags,
        metadata: input.metadata,
        embedding: input.embedding,
        status: MemoryStatus::Active,
        superseded_by: None,
        is_deleted: false,
        source_type: input.source_type.unwrap_or_else(|| "explicit".to_string()),
        created_at: now,
        updated_at: now,
        last_reinforced_at: now,
    };

    let result = conn.execute(
        "INSERT INTO memories (
            id, project_id, subject_id, text, kind, visibility, importance, confidence,
            is_temporal, tags, metadata, embedding, status, superseded_by, is_deleted,
            source_type, created_at, updated_at, last_reinforced_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
        params![
            memory.id,
            memory.project_id,
            memory.subject_id,
            memory.text,
            serde_json::to_value(memory.kind).unwrap().as_str().unwrap(),
            serde_json::to_value(memory.visibility).unwrap().as_str().unwrap(),
            memory.importance,
            memory.confidence,
            memory.is_temporal as i64,
            serde_json::to_string(&memory.tags).unwrap(),
            memory.metadata.to_string(),
            memory.embedding.as_ref().map(|e| embedding_to_blob(e)),
            memory.status.to_string(),
            memory.superseded_by,
            memory.is_deleted as i64,
            memory.source_type,
            memory.created_at,
            memory.updated_at,
            memory.last_reinforced_at,
        ],
    );

    match result {
        Ok(_) => Ok(memory),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            Err(AppError::invalid("memory_id_conflict"))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_memory(conn: &Connection, project_id: &str, id: &str) -> Result<Option<Memory>> {
    conn.query_row(
        "SELECT * FROM memories WHERE project_id = ?1 AND id = ?2",
        params![project_id, id],
        row_to_memory,
    )
    .optional()
    .map_err(Into::into)
}

pub fn update_memory(
    conn: &Connection,
    project_id: &str,
    id: &str,
    patch: UpdateMemoryInput,
) -> Result<Option<Memory>> {
    let Some(mut memory) = get_memory(conn, project_id, id)? else {
        return Ok(None);
    };
    if memory.is_deleted {
        return Ok(None);
    }

    if let Some(text) = patch.text {
        memory.text = text;
    }
    if let Some(kind) = patch.kind {
        memory.kind = kind;
    }
    if let Some(visibility) = patch.visibility {
        memory.visibility = visibility;
    }
    if let Some(importance) = patch.importance {
        memory.importance = clamp_i32(importance, 0, 100);
    }
    if let Some(confidence) = patch.confidence {
        memory.confidence = clamp_f64(confidence, 0.0, 1.0);
    }
    if let Some(is_temporal) = patch.is_temporal {
        memory.is_temporal = is_temporal;
    }
    if let Some(tags) = patch.tags {
        memory.tags = tags;
    }
    if let Some(metadata) = patch.metadata {
        memory.metadata = metadata;
    }
    if let Some(embedding) = patch.embedding {
        memory.embedding = embedding;
    }
    memory.updated_at = Utc::now();

    conn.execute(
        "UPDATE memories SET text=?1, kind=?2, visibility=?3, importance=?4, confidence=?5,
            is_temporal=?6, tags=?7, metadata=?8, embedding=?9, updated_at=?10
         WHERE project_id=?11 AND id=?12",
        params![
            memory.text,
            serde_json::to_value(memory.kind).unwrap().as_str().unwrap(),
            serde_json::to_value(memory.visibility).unwrap().as_str().unwrap(),
            memory.importance,
            memory.confidence,
            memory.is_temporal as i64,
            serde_json::to_string(&memory.tags).unwrap(),
            memory.metadata.to_string(),
            memory.embedding.as_ref().map(|e| embedding_to_blob(e)),
            memory.updated_at,
            project_id,
            id,
        ],
    )?;

    Ok(Some(memory))
}

pub fn delete_memory(conn: &Connection, project_id: &str, id: &str) -> Result<bool> {
    let now = Utc::now();
    let changed = conn.execute(
        "UPDATE memories SET is_deleted = 1, updated_at = ?1 WHERE project_id = ?2 AND id = ?3 AND is_deleted = 0",
        params![now, project_id, id],
    )?;
    Ok(changed > 0)
}

pub fn restore_memory(conn: &Connection, project_id: &str, id: &str) -> Result<RestoreOutcome> {
    let Some(memory) = get_memory(conn, project_id, id)? else {
        return Ok(RestoreOutcome::NotFound);
    };
    if memory.is_deleted {
        return Ok(RestoreOutcome::Deleted);
    }
    if memory.status == MemoryStatus::Active {
        return Ok(RestoreOutcome::AlreadyActive(memory));
    }

    let now = Utc::now();
    conn.execute(
        "UPDATE memories SET status = 'active', superseded_by = NULL, updated_at = ?1 WHERE project_id = ?2 AND id = ?3",
        params![now, project_id, id],
    )?;
    let restored = get_memory(conn, project_id, id)?.expect("row just updated");
    Ok(RestoreOutcome::Restored(restored))
}

pub fn list_memories(
    conn: &Connection,
    project_id: &str,
    subject_id: &str,
    options: ListMemoriesOptions,
) -> Result<Vec<Memory>> {
    let limit = clamp_i32(options.limit as i32, 1, 200) as i64;
    let offset = options.offset.clamp(0, 1_000_000);

    let mut sql = "SELECT * FROM memories WHERE project_id = ?1 AND subject_id = ?2".to_string();
    if !options.include_deleted {
        sql.push_str(" AND is_deleted = 0");
    }
    if !options.include_superseded {
        sql.push_str(" AND status = 'active'");
    }
    sql.push_str(" ORDER BY created_at DESC LIMIT ?3 OFFSET ?4");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![project_id, subject_id, limit, offset], row_to_memory)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn list_superseded_memories(
    conn: &Connection,
    project_id: &str,
    subject_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Memory>> {
    let limit = clamp_i32(limit as i32, 1, 200) as i64;
    let offset = offset.clamp(0, 1_000_000);
    let mut stmt = conn.prepare(
        "SELECT * FROM memories WHERE project_id = ?1 AND subject_id = ?2 AND status = 'superseded' AND is_deleted = 0
         ORDER BY created_at DESC LIMIT ?3 OFFSET ?4",
    )?;
    let rows = stmt
        .query_map(params![project_id, subject_id, limit, offset], row_to_memory)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn search_memories(
    conn: &Connection,
    project_id: &str,
    subject_id: &str,
    query: &SearchMemoriesQuery,
) -> Result<Vec<ScoredMemory>> {
    let limit = clamp_i32(query.limit as i32, 1, 200) as usize;
    let q_lower = query.q.to_lowercase();
    let whole_query_nonempty = !q_lower.trim().is_empty();
    let tokens = tokenize(&query.q);

    let mut stmt = conn.prepare(
        "SELECT * FROM memories WHERE project_id = ?1 AND subject_id = ?2 AND is_deleted = 0 AND status = 'active'",
    )?;
    let rows = stmt
        .query_map(params![project_id, subject_id], row_to_memory)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut scored = Vec::new();
    for memory in rows {
        let text_lower = memory.text.to_lowercase();
        let whole_match = whole_query_nonempty && text_lower.contains(q_lower.trim());
        let token_match = tokens.iter().any(|t| text_lower.contains(t.as_str()));

        let (qualifies, score, effective_score) = if let Some(query_embedding) = &query.query_embedding {
            let similarity = match &memory.embedding {
                Some(row_embedding) => (cosine_similarity(query_embedding, row_embedding) as f64) * 100.0,
                None => 0.0,
            };
            let lexical_bonus = if whole_match {
                20.0
            } else if token_match {
                16.0
            } else {
                0.0
            };
            let qualifies =
                query.q.is_empty() || whole_match || token_match || similarity >= query.min_score;
            let effective = 0.60 * similarity
                + 0.25 * memory.importance as f64
                + 0.15 * memory.confidence * 100.0
                + lexical_bonus;
            (qualifies, similarity, effective)
        } else {
            let qualifies = query.q.is_empty() || whole_match || token_match;
            let effective = 0.25 * memory.importance as f64 + 0.15 * memory.confidence * 100.0;
            (qualifies, 0.0, effective)
        };

        if qualifies {
            scored.push(ScoredMemory {
                memory,
                score,
                effective_score,
            });
        }
    }

    scored.sort_by(|a, b| b.effective_score.partial_cmp(&a.effective_score).unwrap());
    scored.truncate(limit);
    Ok(scored)
}

pub fn find_duplicate_memory(
    conn: &Connection,
    project_id: &str,
    subject_id: &str,
    embedding: &[f32],
    threshold: f64,
) -> Result<Option<Memory>> {
    let candidates = active_memories_with_embedding(conn, project_id, subject_id)?;
    let mut best: Option<(f64, Memory)> = None;
    for memory in candidates {
        let Some(row_embedding) = &memory.embedding else {
            continue;
        };
        let similarity = (cosine_similarity(embedding, row_embedding) as f64) * 100.0;
        if similarity >= threshold {
            if best.as_ref().map(|(s, _)| similarity > *s).unwrap_or(true) {
                best = Some((similarity, memory));
            }
        }
    }
    Ok(best.map(|(_, m)| m))
}

pub fn find_conflicting_memories(
    conn: &Connection,
    project_id: &str,
    subject_id: &str,
    embedding: &[f32],
    min_sim: f64,
    max_sim: f64,
    limit: i64,
) -> Result<Vec<Memory>> {
    let candidates = active_memories_with_embedding(conn, project_id, subject_id)?;
    let mut scored: Vec<(f64, Memory)> = candidates
        .into_iter()
        .filter_map(|memory| {
            let row_embedding = memory.embedding.as_ref()?;
            let similarity = (cosine_similarity(embedding, row_embedding) as f64) * 100.0;
            (similarity >= min_sim && similarity < max_sim).then_some((similarity, memory))
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    scored.truncate(limit.max(0) as usize);
    Ok(scored.into_iter().map(|(_, m)| m).collect())
}

fn active_memories_with_embedding(conn: &Connection, project_id: &str, subject_id: &str) -> Result<Vec<Memory>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM memories WHERE project_id = ?1 AND subject_id = ?2 AND is_deleted = 0 AND status = 'active' AND embedding IS NOT NULL",
    )?;
    let rows = stmt
        .query_map(params![project_id, subject_id], row_to_memory)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn supersede_memories(conn: &Connection, project_id: &str, ids: &[String], superseded_by: &str) -> Result<usize> {
    let now = Utc::now();
    let mut count = 0;
    for id in ids {
        let changed = conn.execute(
            "UPDATE memories SET status = 'superseded', superseded_by = ?1, updated_at = ?2
             WHERE project_id = ?3 AND id = ?4 AND status = 'active'",
            params![superseded_by, now, project_id, id],
        )?;
        count += changed;
    }
    Ok(count)
}

// --- Claims -------------------------------------------------------------

pub fn create_claim(tx: &Connection, input: CreateClaimInput) -> Result<Claim> {
    let claim_id = input.claim_id.unwrap_or_else(|| new_id("clm"));
    let slot = input.slot.unwrap_or_else(|| input.predicate.clone());
    let claim_type = input
        .claim_type
        .unwrap_or_else(|| crate::types::infer_claim_type(&input.predicate).to_string());
    let now = Utc::now();

    let claim = Claim {
        claim_id: claim_id.clone(),
        project_id: input.project_id.clone(),
        subject_id: input.subject_id.clone(),
        predicate: input.predicate,
        object_value: input.object_value.clone(),
        slot: slot.clone(),
        claim_type,
        confidence: clamp_f64(input.confidence.unwrap_or(0.9), 0.0, 1.0),
        importance: clamp_f64(input.importance.unwrap_or(0.5), 0.0, 1.0),
        tags: input.tags,
        source_memory_id: input.source_memory_id,
        subject_entity: input.subject_entity.unwrap_or_else(|| "self".to_string()),
        status: ClaimStatus::Active,
        created_at: now,
        updated_at: now,
        valid_from: None,
        valid_until: None,
        retracted_at: None,
        retract_reason: None,
        embedding: input.embedding,
    };

    tx.execute(
        "INSERT INTO claims (
            claim_id, project_id, subject_id, predicate, object_value, slot, claim_type,
            confidence, importance, tags, source_memory_id, subject_entity, status,
            created_at, updated_at, valid_from, valid_until, retracted_at, retract_reason, embedding
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)",
        params![
            claim.claim_id,
            claim.project_id,
            claim.subject_id,
            claim.predicate,
            claim.object_value,
            claim.slot,
            claim.claim_type,
            claim.confidence,
            claim.importance,
            serde_json::to_string(&claim.tags).unwrap(),
            claim.source_memory_id,
            claim.subject_entity,
            claim.status.to_string(),
            claim.created_at,
            claim.updated_at,
            claim.valid_from,
            claim.valid_until,
            claim.retracted_at,
            claim.retract_reason,
            claim.embedding.as_ref().map(|e| embedding_to_blob(e)),
        ],
    )?;

    tx.execute(
        "INSERT INTO claim_assertions (
            assertion_id, claim_id, memory_id, object_type, value_string, confidence, status,
            first_seen_at, last_seen_at
        ) VALUES (?1,?2,?3,'string',?4,?5,'active',?6,?6)",
        params![
            new_id("cla"),
            claim.claim_id,
            claim.source_memory_id,
            claim.object_value,
            claim.confidence,
            now,
        ],
    )?;

    tx.execute(
        "INSERT INTO slot_state (project_id, subject_id, slot, active_claim_id, status, replaced_by_claim_id, updated_at)
         VALUES (?1,?2,?3,?4,'active',NULL,?5)
         ON CONFLICT (project_id, subject_id, slot) DO UPDATE SET
            active_claim_id = excluded.active_claim_id,
            status = 'active',
            replaced_by_claim_id = NULL,
            updated_at = excluded.updated_at",
        params![claim.project_id, claim.subject_id, slot, claim.claim_id, now],
    )?;

    Ok(claim)
}

pub fn get_claim(conn: &Connection, project_id: &str, claim_id: &str) -> Result<Option<Claim>> {
    conn.query_row(
        "SELECT * FROM claims WHERE project_id = ?1 AND claim_id = ?2",
        params![project_id, claim_id],
        row_to_claim,
    )
    .optional()
    .map_err(Into::into)
}

pub fn retract_claim(tx: &Connection, project_id: &str, claim_id: &str, reason: Option<String>) -> Result<RetractOutcome> {
    let Some(claim) = get_claim(tx, project_id, claim_id)? else {
        return Ok(RetractOutcome {
            success: false,
            claim_id: claim_id.to_string(),
            slot: None,
            previous_claim_id: None,
            restored_previous: false,
        });
    };
    // Idempotent: retracting an already-retracted claim is a no-op.
    if claim.status == crate::types::ClaimStatus::Retracted {
        return Ok(RetractOutcome {
            success: false,
            claim_id: claim_id.to_string(),
            slot: Some(claim.slot),
            previous_claim_id: None,
            restored_previous: false,
        });
    }

    let now = Utc::now();
    tx.execute(
        "UPDATE claims SET status = 'retracted', retracted_at = ?1, retract_reason = ?2, updated_at = ?1
         WHERE project_id = ?3 AND claim_id = ?4",
        params![now, reason, project_id, claim_id],
    )?;

    let previous: Option<String> = tx
        .query_row(
            "SELECT claim_id FROM claims
             WHERE project_id = ?1 AND subject_id = ?2 AND slot = ?3 AND status = 'active' AND claim_id != ?4
             ORDER BY created_at DESC LIMIT 1",
            params![project_id, claim.subject_id, claim.slot, claim_id],
            |row| row.get(0),
        )
        .optional()?;

    tx.execute(
        "INSERT INTO slot_state (project_id, subject_id, slot, active_claim_id, status, replaced_by_claim_id, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7)
         ON CONFLICT (project_id, subject_id, slot) DO UPDATE SET
            active_claim_id = excluded.active_claim_id,
            status = excluded.status,
            replaced_by_claim_id = excluded.replaced_by_claim_id,
            updated_at = excluded.updated_at",
        params![
            project_id,
            claim.subject_id,
            claim.slot,
            previous,
            if previous.is_some() { "active" } else { "retracted" },
            claim_id,
            now,
        ],
    )?;

    if let Some(previous_id) = &previous {
        tx.execute(
            "INSERT OR IGNORE INTO claim_edges (edge_id, project_id, from_claim_id, to_claim_id, edge_type, weight, reason_code, reason_text, created_at)
             VALUES (?1,?2,?3,?4,'retracts',1.0,'manual_retraction',?5,?6)",
            params![new_id("edg"), project_id, claim_id, previous_id, reason, now],
        )?;
    }

    Ok(RetractOutcome {
        success: true,
        claim_id: claim_id.to_string(),
        slot: Some(claim.slot),
        previous_claim_id: previous.clone(),
        restored_previous: previous.is_some(),
    })
}

pub fn get_current_truth(conn: &Connection, project_id: &str, subject_id: &str) -> Result<Vec<SlotSnapshot>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM slot_state WHERE project_id = ?1 AND subject_id = ?2 AND status = 'active' ORDER BY slot",
    )?;
    let slots = stmt
        .query_map(params![project_id, subject_id], row_to_slot)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut snapshots = Vec::with_capacity(slots.len());
    for slot in slots {
        let claim = match &slot.active_claim_id {
            Some(claim_id) => get_claim(conn, project_id, claim_id)?,
            None => None,
        };
        snapshots.push(SlotSnapshot { slot, claim });
    }
    Ok(snapshots)
}

pub fn get_current_slot(conn: &Connection, project_id: &str, subject_id: &str, slot: &str) -> Result<Option<SlotSnapshot>> {
    let row: Option<SlotState> = conn
        .query_row(
            "SELECT * FROM slot_state WHERE project_id = ?1 AND subject_id = ?2 AND slot = ?3",
            params![project_id, subject_id, slot],
            row_to_slot,
        )
        .optional()?;
    let Some(slot_state) = row else {
        return Ok(None);
    };
    let claim = match &slot_state.active_claim_id {
        Some(claim_id) => get_claim(conn, project_id, claim_id)?,
        None => None,
    };
    Ok(Some(SlotSnapshot { slot: slot_state, claim }))
}

pub fn get_slots(conn: &Connection, project_id: &str, subject_id: &str, limit: i64) -> Result<SlotsGrouped> {
    let mut stmt = conn.prepare(
        "SELECT * FROM slot_state WHERE project_id = ?1 AND subject_id = ?2 ORDER BY updated_at DESC LIMIT ?3",
    )?;
    let slots = stmt
        .query_map(params![project_id, subject_id, limit], row_to_slot)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut grouped = SlotsGrouped::default();
    for slot in slots {
        let claim = match &slot.active_claim_id {
            Some(claim_id) => get_claim(conn, project_id, claim_id)?,
            None => None,
        };
        let snapshot = SlotSnapshot { slot: slot.clone(), claim };
        match slot.status {
            SlotStatus::Active => grouped.active.push(snapshot),
            SlotStatus::Superseded => grouped.superseded.push(snapshot),
            SlotStatus::Retracted => grouped.other.push(snapshot),
        }
    }
    Ok(grouped)
}

pub fn get_claim_graph(conn: &Connection, project_id: &str, subject_id: &str, limit: i64) -> Result<ClaimGraph> {
    let mut stmt = conn.prepare(
        "SELECT * FROM claims WHERE project_id = ?1 AND subject_id = ?2 ORDER BY created_at DESC LIMIT ?3",
    )?;
    let claims = stmt
        .query_map(params![project_id, subject_id, limit], row_to_claim)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let claim_ids: Vec<String> = claims.iter().map(|c| c.claim_id.clone()).collect();
    let mut edges = Vec::new();
    let mut edge_type_counts: HashMap<String, i64> = HashMap::new();
    if !claim_ids.is_empty() {
        let placeholders = claim_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT * FROM claim_edges WHERE project_id = ? AND (from_claim_id IN ({placeholders}) OR to_claim_id IN ({placeholders}))"
        );
        let mut edge_stmt = conn.prepare(&sql)?;
        let mut bound: Vec<&dyn rusqlite::ToSql> = vec![project_id as &dyn rusqlite::ToSql];
        for id in &claim_ids {
            bound.push(id);
        }
        for id in &claim_ids {
            bound.push(id);
        }
        let rows = edge_stmt
            .query_map(bound.as_slice(), row_to_edge)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for edge in rows {
            *edge_type_counts.entry(edge.edge_type.to_string()).or_insert(0) += 1;
            edges.push(edge);
        }
    }

    Ok(ClaimGraph {
        claims,
        edges,
        edge_type_counts,
    })
}

pub fn get_claim_history(
    conn: &Connection,
    project_id: &str,
    subject_id: &str,
    slot: Option<&str>,
    limit: i64,
) -> Result<ClaimHistory> {
    let claims: Vec<Claim> = if let Some(slot) = slot {
        let mut stmt = conn.prepare(
            "SELECT * FROM claims WHERE project_id = ?1 AND subject_id = ?2 AND slot = ?3 ORDER BY created_at DESC LIMIT ?4",
        )?;
        stmt.query_map(params![project_id, subject_id, slot, limit], row_to_claim)?
            .collect::<rusqlite::Result<Vec<_>>>()?
    } else {
        let mut stmt = conn.prepare(
            "SELECT * FROM claims WHERE project_id = ?1 AND subject_id = ?2 ORDER BY created_at DESC LIMIT ?3",
        )?;
        stmt.query_map(params![project_id, subject_id, limit], row_to_claim)?
            .collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut by_slot: HashMap<String, Vec<Claim>> = HashMap::new();
    let mut claim_ids = Vec::new();
    for claim in claims {
        claim_ids.push(claim.claim_id.clone());
        by_slot.entry(claim.slot.clone()).or_default().push(claim);
    }

    let mut supersedes_edges = Vec::new();
    if !claim_ids.is_empty() {
        let placeholders = claim_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT * FROM claim_edges WHERE project_id = ? AND edge_type = 'supersedes' AND from_claim_id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut bound: Vec<&dyn rusqlite::ToSql> = vec![project_id as &dyn rusqlite::ToSql];
        for id in &claim_ids {
            bound.push(id);
        }
        supersedes_edges = stmt
            .query_map(bound.as_slice(), row_to_edge)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
    }

    Ok(ClaimHistory {
        slots: by_slot,
        supersedes_edges,
    })
}

// --- Recall events ------------------------------------------------------

pub fn record_recall_event(conn: &Connection, event: NewRecallEvent) -> Result<MemoryRecallEvent> {
    let recall_id = new_id("rcl");
    let now = Utc::now();
    conn.execute(
        "INSERT INTO memory_recall_events (
            recall_id, project_id, memory_id, subject_id, chat_id, message_index,
            similarity_score, request_type, model_id, created_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
        params![
            recall_id,
            event.project_id,
            event.memory_id,
            event.subject_id,
            event.chat_id,
            event.message_index,
            event.similarity_score,
            event.request_type,
            event.model_id,
            now,
        ],
    )?;
    Ok(MemoryRecallEvent {
        recall_id,
        project_id: event.project_id,
        memory_id: event.memory_id,
        subject_id: event.subject_id,
        chat_id: event.chat_id,
        message_index: event.message_index,
        similarity_score: event.similarity_score,
        request_type: event.request_type,
        model_id: event.model_id,
        created_at: now,
    })
}

pub fn recall_events_by_chat(conn: &Connection, project_id: &str, chat_id: &str, limit: i64) -> Result<Vec<MemoryRecallEvent>> {
    let limit = limit.clamp(1, 1_000);
    let mut stmt = conn.prepare(
        "SELECT * FROM memory_recall_events WHERE project_id = ?1 AND chat_id = ?2 ORDER BY created_at ASC LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![project_id, chat_id, limit], row_to_recall)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn recall_events_by_memory(conn: &Connection, project_id: &str, memory_id: &str, limit: i64) -> Result<Vec<MemoryRecallEvent>> {
    let limit = limit.clamp(1, 1_000);
    let mut stmt = conn.prepare(
        "SELECT * FROM memory_recall_events WHERE project_id = ?1 AND memory_id = ?2 ORDER BY created_at DESC LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![project_id, memory_id, limit], row_to_recall)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn recall_stats(conn: &Connection, project_id: &str) -> Result<RecallStats> {
    conn.query_row(
        "SELECT count(*), count(DISTINCT chat_id), count(DISTINCT subject_id),
                coalesce(avg(similarity_score), 0.0), min(created_at), max(created_at)
         FROM memory_recall_events WHERE project_id = ?1",
        params![project_id],
        |row| {
            Ok(RecallStats {
                count: row.get(0)?,
                distinct_chats: row.get(1)?,
                distinct_subjects: row.get(2)?,
                average_score: row.get(3)?,
                min_created_at: row.get(4)?,
                max_created_at: row.get(5)?,
            })
        },
    )
    .map_err(Into::into)
}

fn row_to_assertion(row: &Row) -> rusqlite::Result<crate::types::ClaimAssertion> {
    use crate::types::AssertionValue;

    let object_type: String = row.get("object_type")?;
    let value = match object_type.as_str() {
        "number" => AssertionValue::Number { value_number: row.get("value_number")? },
        "date" => AssertionValue::Date { value_date: row.get("value_date")? },
        "json" => {
            let raw: String = row.get("value_json")?;
            AssertionValue::Json { value_json: serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null) }
        }
        _ => AssertionValue::String { value_string: row.get("value_string")? },
    };
    let status_str: String = row.get("status")?;

    Ok(crate::types::ClaimAssertion {
        assertion_id: row.get("assertion_id")?,
        claim_id: row.get("claim_id")?,
        memory_id: row.get("memory_id")?,
        value,
        confidence: row.get("confidence")?,
        status: status_str.parse().unwrap_or(ClaimStatus::Active),
        first_seen_at: row.get("first_seen_at")?,
        last_seen_at: row.get("last_seen_at")?,
    })
}

/// Single-claim detail: the claim, its assertions, and its `supersedes`
/// edges in either direction.
pub fn get_claim_detail(
    conn: &Connection,
    project_id: &str,
    claim_id: &str,
) -> Result<Option<crate::types::ClaimDetail>> {
    let Some(claim) = get_claim(conn, project_id, claim_id)? else { return Ok(None) };

    let mut assertion_stmt =
        conn.prepare("SELECT * FROM claim_assertions WHERE claim_id = ?1 ORDER BY first_seen_at ASC")?;
    let assertions = assertion_stmt
        .query_map(params![claim_id], row_to_assertion)?
        .collect::<rusqlite::Result<_>>()?;

    let mut edge_stmt = conn.prepare(
        "SELECT * FROM claim_edges WHERE project_id = ?1 AND edge_type = 'supersedes'
            AND (from_claim_id = ?2 OR to_claim_id = ?2)
         ORDER BY created_at DESC",
    )?;
    let supersedes_edges = edge_stmt
        .query_map(params![project_id, claim_id], row_to_edge)?
        .collect::<rusqlite::Result<_>>()?;

    Ok(Some(crate::types::ClaimDetail { claim, assertions, supersedes_edges }))
}

/// Claims sourced from one memory, each with its evidence assertions (spec
/// §6 `GET /api/v1/memories/:id/claims`).
pub fn claims_for_memory(
    conn: &Connection,
    project_id: &str,
    memory_id: &str,
) -> Result<Vec<crate::types::ClaimWithAssertions>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM claims WHERE project_id = ?1 AND source_memory_id = ?2 ORDER BY created_at DESC",
    )?;
    let claims: Vec<Claim> = stmt
        .query_map(params![project_id, memory_id], row_to_claim)?
        .collect::<rusqlite::Result<_>>()?;

    let mut out = Vec::with_capacity(claims.len());
    for claim in claims {
        let mut assertion_stmt = conn.prepare(
            "SELECT * FROM claim_assertions WHERE claim_id = ?1 ORDER BY first_seen_at ASC",
        )?;
        let assertions = assertion_stmt
            .query_map(params![claim.claim_id], row_to_assertion)?
            .collect::<rusqlite::Result<_>>()?;
        out.push(crate::types::ClaimWithAssertions { claim, assertions });
    }

    Ok(out)
}

pub fn health_check(conn: &Connection) -> Result<HealthStatus> {
    let start = std::time::Instant::now();
    let result: rusqlite::Result<i64> = conn.query_row("SELECT 1", [], |row| row.get(0));
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    match result {
        Ok(_) => Ok(HealthStatus {
            healthy: true,
            latency_ms,
            error: None,
        }),
        Err(e) => Ok(HealthStatus {
            healthy: false,
            latency_ms,
            error: Some(e.to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::Storage;

    fn open() -> Storage {
        Storage::open_in_memory().unwrap()
    }

    #[test]
    fn create_then_get_memory() {
        let storage = open();
        let memory = storage
            .with_connection(|conn| {
                create_memory(
                    conn,
                    CreateMemoryInput {
                        id: None,
                        project_id: "p".into(),
                        subject_id: "s".into(),
                        text: "hello world".into(),
                        kind: None,
                        visibility: None,
                        importance: None,
                        confidence: None,
                        is_temporal: None,
                        tags: vec![],
                        metadata: serde_json::json!({}),
                        embedding: None,
                        source_type: None,
                    },
                )
            })
            .unwrap();
        assert_eq!(memory.importance, 50);
        assert!((memory.confidence - 0.95).abs() < 1e-9);

        let fetched = storage
            .with_connection(|conn| get_memory(conn, "p", &memory.id))
            .unwrap()
            .unwrap();
        assert_eq!(fetched.text, "hello world");
    }

    #[test]
    fn search_substring_match_without_embedding() {
        let storage = open();
        storage
            .with_connection(|conn| {
                create_memory(
                    conn,
                    CreateMemoryInput {
                        id: None,
                        project_id: "p".into(),
                        subject_id: "s".into(),
                        text: "I work at Acme Corp".into(),
                        kind: None,
                        visibility: None,
                        importance: Some(70),
                        confidence: Some(0.9),
                        is_temporal: None,
                        tags: vec![],
                        metadata: serde_json::json!({}),
                        embedding: None,
                        source_type: None,
                    },
                )
            })
            .unwrap();

        let results = storage
            .with_connection(|conn| {
                search_memories(
                    conn,
                    "p",
                    "s",
                    &SearchMemoriesQuery {
                        q: "Acme".into(),
                        query_embedding: None,
                        limit: 25,
                        min_score: 0.0,
                    },
                )
            })
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn duplicate_and_conflict_thresholds() {
        let storage = open();
        let base = vec![1.0f32, 0.0, 0.0];
        storage
            .with_connection(|conn| {
                create_memory(
                    conn,
                    CreateMemoryInput {
                        id: None,
                        project_id: "p".into(),
                        subject_id: "s".into(),
                        text: "original".into(),
                        kind: None,
                        visibility: None,
                        importance: None,
                        confidence: None,
                        is_temporal: None,
                        tags: vec![],
                        metadata: serde_json::json!({}),
                        embedding: Some(base.clone()),
                        source_type: None,
                    },
                )
            })
            .unwrap();

        // identical vector => similarity 100, at or above threshold 85.
        let dup = storage
            .with_connection(|conn| find_duplicate_memory(conn, "p", "s", &base, 85.0))
            .unwrap();
        assert!(dup.is_some());

        let conflicts = storage
            .with_connection(|conn| find_conflicting_memories(conn, "p", "s", &base, 60.0, 85.0, 50))
            .unwrap();
        assert!(conflicts.is_empty(), "identical vector (sim=100) is outside [60,85)");
    }

    #[test]
    fn claim_create_then_retract_restores_previous() {
        let storage = open();
        let a = storage
            .with_transaction(|tx| {
                create_claim(
                    tx,
                    CreateClaimInput {
                        claim_id: None,
                        project_id: "p".into(),
                        subject_id: "s".into(),
                        predicate: "favorite_color".into(),
                        object_value: "yellow".into(),
                        slot: None,
                        claim_type: None,
                        confidence: None,
                        importance: None,
                        tags: vec![],
                        source_memory_id: None,
                        subject_entity: None,
                        embedding: None,
                    },
                )
            })
            .unwrap();
        let b = storage
            .with_transaction(|tx| {
                create_claim(
                    tx,
                    CreateClaimInput {
                        claim_id: None,
                        project_id: "p".into(),
                        subject_id: "s".into(),
                        predicate: "favorite_color".into(),
                        object_value: "blue".into(),
                        slot: None,
                        claim_type: None,
                        confidence: None,
                        importance: None,
                        tags: vec![],
                        source_memory_id: None,
                        subject_entity: None,
                        embedding: None,
                    },
                )
            })
            .unwrap();

        let slot_before = storage
            .with_connection(|conn| get_current_slot(conn, "p", "s", "favorite_color"))
            .unwrap()
            .unwrap();
        assert_eq!(slot_before.claim.unwrap().object_value, "blue");

        let outcome = storage
            .with_transaction(|tx| retract_claim(tx, "p", &b.claim_id, Some("changed mind".to_string())))
            .unwrap();
        assert!(outcome.restored_previous);
        assert_eq!(outcome.previous_claim_id.as_deref(), Some(a.claim_id.as_str()));

        let slot_after = storage
            .with_connection(|conn| get_current_slot(conn, "p", "s", "favorite_color"))
            .unwrap()
            .unwrap();
        assert_eq!(slot_after.claim.unwrap().object_value, "yellow");
    }

    #[test]
    fn retract_retract_is_noop() {
        let storage = open();
        let a = storage
            .with_transaction(|tx| {
                create_claim(
                    tx,
                    CreateClaimInput {
                        claim_id: None,
                        project_id: "p".into(),
                        subject_id: "s".into(),
                        predicate: "name".into(),
                        object_value: "Alice".into(),
                        slot: None,
                        claim_type: None,
                        confidence: None,
                        importance: None,
                        tags: vec![],
                        source_memory_id: None,
                        subject_entity: None,
                        embedding: None,
                    },
                )
            })
            .unwrap();

        let first = storage
            .with_transaction(|tx| retract_claim(tx, "p", &a.claim_id, None))
            .unwrap();
        assert!(first.success);

        let second = storage
            .with_transaction(|tx| retract_claim(tx, "p", &a.claim_id, None))
            .unwrap();
        assert!(!second.success);
        assert!(!second.restored_previous);

        let slot = storage
            .with_connection(|conn| get_current_slot(conn, "p", "s", "name"))
            .unwrap()
            .unwrap();
        assert_eq!(slot.slot.status, SlotStatus::Retracted);
        assert!(slot.slot.active_claim_id.is_none());
    }
}
