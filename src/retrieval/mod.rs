//! Retrieval service: a `simple` variant and an LLM-expanded variant
//! (classify → dispatch per mode → rerank).

mod classify;
mod rerank;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::embedding::Embedder;
use crate::error::Result;
use crate::llm::LlmClient;
use crate::storage::StorageBackend;
use crate::types::{ListMemoriesOptions, MemoryId, ScoredMemory, SearchMemoriesQuery};

pub use classify::ClassifyResult;

const QUERY_SET_CAP: usize = 6;
const DEFAULT_SEARCH_LIMIT: i64 = 25;
const MAX_SEARCH_LIMIT: i64 = 200;

/// Which fan-out strategy produced a retrieval result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Broad,
    Direct,
    Indirect,
    Simple,
}

/// Shared response shape for both retrieval variants.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub memories: Vec<ScoredMemory>,
    pub mode: RetrievalMode,
    pub used_queries: Vec<String>,
    pub predicates: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub project_id: String,
    pub subject_id: String,
    pub q: String,
    pub limit: i64,
    pub conversation_context: Vec<String>,
}

fn clamp_limit(limit: i64) -> i64 {
    if limit <= 0 {
        DEFAULT_SEARCH_LIMIT
    } else {
        limit.min(MAX_SEARCH_LIMIT)
    }
}

/// Single embedding attempt, single search call.
pub async fn retrieve_simple(
    storage: &dyn StorageBackend,
    embedder: &dyn Embedder,
    req: &RetrievalRequest,
) -> Result<RetrievalResult> {
    let limit = clamp_limit(req.limit);
    let embedding = embedder.embed(&req.q).await;
    let query = SearchMemoriesQuery {
        q: req.q.clone(),
        query_embedding: if embedding.is_empty() { None } else { Some(embedding) },
        limit,
        min_score: 0.0,
    };
    let memories = storage.search_memories(&req.project_id, &req.subject_id, &query)?;
    Ok(RetrievalResult {
        memories,
        mode: RetrievalMode::Simple,
        used_queries: vec![req.q.clone()],
        predicates: Vec::new(),
    })
}

/// Classify → dispatch per mode → rerank. Only meaningful when `llm` is a
/// real client; callers gate this behind `use_retrieval_expand` and LLM
/// availability.
pub async fn retrieve_expanded(
    storage: &dyn StorageBackend,
    embedder: &dyn Embedder,
    llm: &dyn LlmClient,
    req: &RetrievalRequest,
) -> Result<RetrievalResult> {
    if req.q.trim().is_empty() {
        return Ok(RetrievalResult {
            memories: Vec::new(),
            mode: RetrievalMode::Indirect,
            used_queries: Vec::new(),
            predicates: Vec::new(),
        });
    }

    let limit = clamp_limit(req.limit);
    let classified = classify::classify(llm, &req.q, &req.conversation_context).await;

    match classified.mode {
        RetrievalMode::Broad => dispatch_broad(storage, req, limit).await,
        RetrievalMode::Direct => dispatch_direct(storage, embedder, llm, req, limit, &classified).await,
        _ => dispatch_indirect(storage, embedder, llm, req, limit, &classified).await,
    }
}

async fn dispatch_broad(storage: &dyn StorageBackend, req: &RetrievalRequest, limit: i64) -> Result<RetrievalResult> {
    let fetch_limit = (limit * 3).min(MAX_SEARCH_LIMIT);
    let options = ListMemoriesOptions { limit: fetch_limit, offset: 0, include_deleted: false, include_superseded: false };
    let mut memories = storage.list_memories(&req.project_id, &req.subject_id, options)?;

    memories.sort_by(|a, b| b.importance.cmp(&a.importance).then_with(|| b.created_at.cmp(&a.created_at)));
    let keep = (limit as usize).max(20);
    memories.truncate(keep);

    let scored = memories
        .into_iter()
        .map(|m| {
            let effective_score = m.importance as f64;
            ScoredMemory { memory: m, score: 100.0, effective_score }
        })
        .collect();

    Ok(RetrievalResult {
        memories: scored,
        mode: RetrievalMode::Broad,
        used_queries: vec![req.q.clone()],
        predicates: Vec::new(),
    })
}

async fn dispatch_direct(
    storage: &dyn StorageBackend,
    embedder: &dyn Embedder,
    llm: &dyn LlmClient,
    req: &RetrievalRequest,
    limit: i64,
    classified: &ClassifyResult,
) -> Result<RetrievalResult> {
    let used_queries = dedupe_truncate(&req.q, &classified.search_hints, QUERY_SET_CAP);
    let mut merged = fan_out_search(storage, embedder, &req.project_id, &req.subject_id, &used_queries, limit).await?;

    let mut claim_backed = false;
    if !classified.predicates.is_empty() {
        let synthesized = synthesize_claim_backed(storage, &req.project_id, &req.subject_id, &classified.predicates)?;
        if !synthesized.is_empty() {
            claim_backed = true;
        }
        merge_candidates(&mut merged, synthesized, 0);
    }

    let top_n = (limit as usize).min(5);
    let mut memories: Vec<ScoredMemory> = merged.into_values().collect();
    memories.sort_by(|a, b| b.effective_score.partial_cmp(&a.effective_score).unwrap_or(std::cmp::Ordering::Equal));

    let final_memories = if claim_backed {
        memories.into_iter().take(top_n).collect()
    } else if memories.len() > limit as usize {
        rerank::rerank(llm, &req.q, memories, top_n).await
    } else {
        memories.into_iter().take(top_n).collect()
    };

    Ok(RetrievalResult {
        memories: final_memories,
        mode: RetrievalMode::Direct,
        used_queries,
        predicates: classified.predicates.clone(),
    })
}

async fn dispatch_indirect(
    storage: &dyn StorageBackend,
    embedder: &dyn Embedder,
    llm: &dyn LlmClient,
    req: &RetrievalRequest,
    limit: i64,
    classified: &ClassifyResult,
) -> Result<RetrievalResult> {
    let mut hints: Vec<String> = classified.search_hints.clone();
    hints.extend(classified.expanded_queries.clone());
    let used_queries = dedupe_truncate(&req.q, &hints, QUERY_SET_CAP);

    let merged = fan_out_search(storage, embedder, &req.project_id, &req.subject_id, &used_queries, limit).await?;
    let mut memories: Vec<ScoredMemory> = merged.into_values().collect();
    memories.sort_by(|a, b| b.effective_score.partial_cmp(&a.effective_score).unwrap_or(std::cmp::Ordering::Equal));

    let final_memories = if memories.len() > limit as usize {
        rerank::rerank(llm, &req.q, memories, limit as usize).await
    } else {
        memories.into_iter().take(limit as usize).collect()
    };

    Ok(RetrievalResult {
        memories: final_memories,
        mode: RetrievalMode::Indirect,
        used_queries,
        predicates: classified.predicates.clone(),
    })
}

fn dedupe_truncate(original: &str, extra: &[String], cap: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for q in std::iter::once(original.to_string()).chain(extra.iter().cloned()) {
        if q.trim().is_empty() {
            continue;
        }
        if seen.insert(q.clone()) {
            out.push(q);
        }
        if out.len() >= cap {
            break;
        }
    }
    out
}

/// Embed + search each query (best-effort embedding), merging results by
/// memory id keeping the highest-scoring variant, and applying a per-query
/// rank penalty of `1 - 0.03 * rank_index`.
async fn fan_out_search(
    storage: &dyn StorageBackend,
    embedder: &dyn Embedder,
    project_id: &str,
    subject_id: &str,
    queries: &[String],
    request_limit: i64,
) -> Result<HashMap<MemoryId, ScoredMemory>> {
    let search_limit = (request_limit * 2).min(MAX_SEARCH_LIMIT);
    let mut merged: HashMap<MemoryId, ScoredMemory> = HashMap::new();

    for (rank_index, q) in queries.iter().enumerate() {
        let embedding = embedder.embed(q).await;
        let query = SearchMemoriesQuery {
            q: q.clone(),
            query_embedding: if embedding.is_empty() { None } else { Some(embedding) },
            limit: search_limit,
            min_score: 0.0,
        };
        let hits = storage.search_memories(project_id, subject_id, &query)?;
        merge_candidates(&mut merged, hits, rank_index);
    }

    Ok(merged)
}

fn merge_candidates(merged: &mut HashMap<MemoryId, ScoredMemory>, candidates: Vec<ScoredMemory>, rank_index: usize) {
    let penalty = 1.0 - 0.03 * rank_index as f64;
    for mut candidate in candidates {
        candidate.effective_score *= penalty;
        merged
            .entry(candidate.memory.id.clone())
            .and_modify(|existing| {
                if candidate.effective_score > existing.effective_score {
                    *existing = candidate.clone();
                }
            })
            .or_insert(candidate);
    }
}

/// Synthesize claim-backed candidates: for each slot whose predicate is in
/// `predicates`, resolve the winning claim's source memory if it is still
/// active and not deleted. Used by direct-mode dispatch.
fn synthesize_claim_backed(
    storage: &dyn StorageBackend,
    project_id: &str,
    subject_id: &str,
    predicates: &[String],
) -> Result<Vec<ScoredMemory>> {
    let truth = storage.get_current_truth(project_id, subject_id)?;
    let mut out = Vec::new();

    for snapshot in truth {
        if !predicates.contains(&snapshot.slot.slot) {
            continue;
        }
        let Some(claim) = snapshot.claim else { continue };
        let Some(source_id) = claim.source_memory_id else { continue };
        let Some(memory) = storage.get_memory(project_id, &source_id)? else { continue };
        if memory.is_deleted || !matches!(memory.status, crate::types::MemoryStatus::Active) {
            continue;
        }
        out.push(ScoredMemory { memory, score: 100.0, effective_score: 120.0 });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_truncate_caps_and_dedupes() {
        let original = "weekend plans";
        let extra = vec!["weekend plans".to_string(), "a".to_string(), "b".to_string(), "c".to_string(), "d".to_string(), "e".to_string()];
        let result = dedupe_truncate(original, &extra, QUERY_SET_CAP);
        assert_eq!(result.len(), QUERY_SET_CAP);
        assert_eq!(result[0], "weekend plans");
    }

    #[test]
    fn dedupe_truncate_drops_blank() {
        let result = dedupe_truncate("q", &["".to_string(), "  ".to_string()], 6);
        assert_eq!(result, vec!["q".to_string()]);
    }
}
