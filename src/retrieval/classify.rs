//! Query classification: mode + predicates + search hints + expanded queries.
//! The first step of the LLM-expanded retrieval variant.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::{LlmClient, LlmRequest};

use super::RetrievalMode;

const CLASSIFY_DEADLINE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResult {
    pub mode: RetrievalMode,
    #[serde(default)]
    pub predicates: Vec<String>,
    #[serde(default)]
    pub search_hints: Vec<String>,
    #[serde(default)]
    pub expanded_queries: Vec<String>,
}

impl Default for ClassifyResult {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::Indirect,
            predicates: Vec::new(),
            search_hints: Vec::new(),
            expanded_queries: Vec::new(),
        }
    }
}

/// Classify the query, falling back to the default `indirect`/empty shape on
/// any call failure or invalid mode (`broad`/`direct`/`indirect` only).
pub async fn classify(llm: &dyn LlmClient, q: &str, conversation_context: &[String]) -> ClassifyResult {
    let context: Vec<&str> = conversation_context
        .iter()
        .rev()
        .take(5)
        .rev()
        .map(|s| s.as_str())
        .collect();

    let system = "Classify the retrieval intent of a query against a subject's memory store. \
         Respond with JSON: {\"mode\":\"broad|direct|indirect\",\"predicates\":[string, max 3],\
         \"search_hints\":[string, max 3],\"expanded_queries\":[string, max 3]}. \
         `broad` means a profile-style listing request; `direct` means a specific fact lookup; \
         `indirect` means advice that needs supporting context.";
    let user = serde_json::json!({"query": q, "conversation_context": context}).to_string();

    let Some(value) = llm.call_json(LlmRequest::new(system, user, CLASSIFY_DEADLINE)).await else {
        return ClassifyResult::default();
    };

    match serde_json::from_value::<ClassifyResult>(value) {
        Ok(mut result) => {
            if !matches!(result.mode, RetrievalMode::Broad | RetrievalMode::Direct | RetrievalMode::Indirect) {
                return ClassifyResult::default();
            }
            result.predicates.truncate(3);
            result.search_hints.truncate(3);
            result.expanded_queries.truncate(3);
            result
        }
        Err(_) => ClassifyResult::default(),
    }
}
