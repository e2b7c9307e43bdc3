//! LLM-backed candidate rerank.

use std::time::Duration;

use serde::Deserialize;

use crate::llm::{LlmClient, LlmRequest};
use crate::types::ScoredMemory;

const RERANK_DEADLINE: Duration = Duration::from_secs(3);
const MIN_TEXT_LEN: usize = 10;

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    relevant: bool,
    score: f64,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    #[serde(default)]
    results: Vec<RerankHit>,
}

/// Filter to candidates with enough text to judge, then ask the LLM to rank
/// them against `query`. Falls back to a plain truncation on any failure.
pub async fn rerank(llm: &dyn LlmClient, query: &str, candidates: Vec<ScoredMemory>, top_k: usize) -> Vec<ScoredMemory> {
    let filtered: Vec<ScoredMemory> = candidates
        .into_iter()
        .filter(|c| c.memory.text.chars().count() >= MIN_TEXT_LEN)
        .collect();

    if filtered.len() <= top_k {
        return filtered;
    }

    match rerank_call(llm, query, &filtered).await {
        Some(hits) => apply_rerank(filtered, hits, top_k),
        None => filtered.into_iter().take(top_k).collect(),
    }
}

async fn rerank_call(llm: &dyn LlmClient, query: &str, candidates: &[ScoredMemory]) -> Option<Vec<RerankHit>> {
    let system = "Rank candidate memories by relevance to a query. Respond with JSON: \
         {\"results\":[{\"index\":int,\"relevant\":bool,\"score\":float 0-1}]}.";
    let items: Vec<serde_json::Value> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| serde_json::json!({"index": i, "text": c.memory.text}))
        .collect();
    let user = serde_json::json!({"query": query, "candidates": items}).to_string();

    let value = llm.call_json(LlmRequest::new(system, user, RERANK_DEADLINE)).await?;
    let response: RerankResponse = serde_json::from_value(value).ok()?;
    Some(response.results)
}

fn apply_rerank(candidates: Vec<ScoredMemory>, hits: Vec<RerankHit>, top_k: usize) -> Vec<ScoredMemory> {
    let len = candidates.len();
    let mut candidates: Vec<Option<ScoredMemory>> = candidates.into_iter().map(Some).collect();

    let mut ranked: Vec<(usize, f64)> = hits
        .into_iter()
        .filter(|h| h.relevant)
        .map(|h| (h.index.min(len.saturating_sub(1)), h.score))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_k);

    ranked
        .into_iter()
        .filter_map(|(index, score)| {
            let mut item = candidates.get_mut(index)?.take()?;
            let rerank_score = score * 100.0;
            if rerank_score > item.score {
                item.score = rerank_score;
            }
            if rerank_score > item.effective_score {
                item.effective_score = rerank_score;
            }
            Some(item)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmClient, LlmRequest};
    use async_trait::async_trait;

    struct StubLlm(serde_json::Value);

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn call_json(&self, _req: LlmRequest) -> Option<serde_json::Value> {
            Some(self.0.clone())
        }
        fn name(&self) -> &str {
            "stub"
        }
    }

    fn memory_with_text(text: &str) -> crate::types::Memory {
        crate::types::Memory {
            id: "mem_1".to_string(),
            project_id: "p".to_string(),
            subject_id: "s".to_string(),
            text: text.to_string(),
            kind: crate::types::MemoryKind::Note,
            visibility: crate::types::Visibility::Private,
            importance: 50,
            confidence: 0.9,
            is_temporal: false,
            tags: vec![],
            metadata: serde_json::Value::Null,
            embedding: None,
            status: crate::types::MemoryStatus::Active,
            superseded_by: None,
            is_deleted: false,
            source_type: "explicit".to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            last_reinforced_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn fewer_than_top_k_returns_as_is() {
        let candidates = vec![ScoredMemory { memory: memory_with_text("hello world there"), score: 1.0, effective_score: 1.0 }];
        let llm = StubLlm(serde_json::json!({"results": []}));
        let result = rerank(&llm, "q", candidates, 5).await;
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn short_text_is_filtered_out() {
        let candidates = vec![ScoredMemory { memory: memory_with_text("hi"), score: 1.0, effective_score: 1.0 }];
        let llm = StubLlm(serde_json::json!({"results": []}));
        let result = rerank(&llm, "q", candidates, 5).await;
        assert!(result.is_empty());
    }
}
