//! Text → normalized memories+claims extraction: an LLM variant with a
//! deterministic pattern-based fallback.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::llm::{LlmClient, LlmRequest};
use crate::types::{collapse_whitespace, truncate_chars, MemoryKind, Visibility};

const EXTRACTION_DEADLINE: Duration = Duration::from_secs(4);
const HEURISTIC_MEMORY_MAX_LEN: usize = 2_000;
const TRIVIAL_INPUT_MAX_LEN: usize = 40;

/// One extracted claim, prior to id assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedClaim {
    pub predicate: String,
    pub object_value: String,
    pub claim_type: String,
    pub confidence: f64,
}

/// One extracted memory, prior to id assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedMemory {
    pub text: String,
    #[serde(default)]
    pub kind: MemoryKind,
    #[serde(default = "default_importance")]
    pub importance: i32,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub is_temporal: bool,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub claims: Vec<ExtractedClaim>,
}

fn default_importance() -> i32 {
    50
}

fn default_confidence() -> f64 {
    0.8
}

/// Shared output shape for both extraction variants.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractionResult {
    pub memories: Vec<ExtractedMemory>,
}

#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub text: String,
    pub force: bool,
    pub conversation_context: Vec<String>,
}

/// Run the LLM variant if a real LLM is configured, falling through to the
/// heuristic variant on timeout, network failure, unparseable JSON, an empty
/// `memories` array, or a schema mismatch.
pub async fn extract(llm: &dyn LlmClient, input: &ExtractionInput) -> ExtractionResult {
    if let Some(result) = llm_extract(llm, input).await {
        if !result.memories.is_empty() {
            return result;
        }
    }
    heuristic_extract(&input.text, input.force)
}

async fn llm_extract(llm: &dyn LlmClient, input: &ExtractionInput) -> Option<ExtractionResult> {
    if llm.name() == "none" {
        return None;
    }

    let context: Vec<&str> = input
        .conversation_context
        .iter()
        .rev()
        .take(5)
        .rev()
        .map(|s| s.as_str())
        .collect();

    let system = "You extract durable memories and structured claims from user text. \
         Respond with JSON: {\"memories\":[{\"text\":string,\"kind\":\"fact|preference|context|note|event|trait\",\
         \"importance\":int 0-100,\"confidence\":float 0-1,\"is_temporal\":bool,\"visibility\":\"private|shared|public\",\
         \"tags\":[string],\"claims\":[{\"predicate\":string,\"object_value\":string,\"claim_type\":string,\"confidence\":float}]}]}. \
         Prefer durable facts and preferences over ephemeral chit-chat. Return {\"memories\":[]} if nothing durable is present.";
    let user = serde_json::json!({
        "text": input.text,
        "force": input.force,
        "conversation_context": context,
    })
    .to_string();

    let req = LlmRequest::new(system, user, EXTRACTION_DEADLINE);
    let value = llm.call_json(req).await?;
    serde_json::from_value::<ExtractionResult>(value).ok()
}

static TRIVIAL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(hi|hello|hey|thanks|thank you|ok|okay|yes|no|sure|bye|goodbye|cool|nice|great)[.!? ]*\s*$")
        .unwrap()
});

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)my name is\s+(.+)").unwrap());
static LIVES_IN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)i live in\s+(.+)").unwrap());
static WORKS_AT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)i work at\s+(.+)").unwrap());
static FAVORITE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)my favorite\s+(.+?)\s+is\s+(.+)").unwrap());
static LIKES_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)i like\s+(.+)").unwrap());

/// Normalize a predicate: lowercase, strip non-alphanumeric/underscore,
/// collapse whitespace to underscore.
fn normalize_predicate(raw: &str) -> String {
    let collapsed = collapse_whitespace(raw).to_lowercase();
    let cleaned: String = collapsed
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect();
    collapse_whitespace(&cleaned).replace(' ', "_")
}

fn clean_value(raw: &str) -> String {
    raw.trim().trim_end_matches(['.', '!', '?']).trim().to_string()
}

/// Deterministic pattern-based extractor, used when no LLM is configured or
/// the LLM variant fails to produce anything durable.
pub fn heuristic_extract(text: &str, force: bool) -> ExtractionResult {
    let trimmed = collapse_whitespace(text);

    if !force && trimmed.chars().count() < TRIVIAL_INPUT_MAX_LEN && TRIVIAL_PATTERN.is_match(&trimmed) {
        return ExtractionResult::default();
    }

    let memory_text = truncate_chars(&trimmed, HEURISTIC_MEMORY_MAX_LEN);
    let mut claims = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let mut push = |predicate: String, object_value: String, claim_type: &str, confidence: f64| {
        let key = (predicate.clone(), object_value.to_lowercase());
        if seen.insert(key) {
            claims.push(ExtractedClaim {
                predicate,
                object_value,
                claim_type: claim_type.to_string(),
                confidence,
            });
        }
    };

    if let Some(caps) = NAME_PATTERN.captures(&trimmed) {
        push("name".to_string(), clean_value(&caps[1]), "fact", 0.9);
    }
    if let Some(caps) = LIVES_IN_PATTERN.captures(&trimmed) {
        push("lives_in".to_string(), clean_value(&caps[1]), "fact", 0.85);
    }
    if let Some(caps) = WORKS_AT_PATTERN.captures(&trimmed) {
        push("works_at".to_string(), clean_value(&caps[1]), "fact", 0.85);
    }
    if let Some(caps) = FAVORITE_PATTERN.captures(&trimmed) {
        let predicate = format!("favorite_{}", normalize_predicate(&caps[1]));
        push(predicate, clean_value(&caps[2]), "preference", 0.85);
    }
    if let Some(caps) = LIKES_PATTERN.captures(&trimmed) {
        push("likes".to_string(), clean_value(&caps[1]), "preference", 0.70);
    }

    let kind = if claims.is_empty() { MemoryKind::Note } else { MemoryKind::Fact };

    ExtractionResult {
        memories: vec![ExtractedMemory {
            text: memory_text,
            kind,
            importance: default_importance(),
            confidence: default_confidence(),
            is_temporal: false,
            visibility: Visibility::Private,
            tags: Vec::new(),
            claims,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_greeting_without_force_is_empty() {
        let result = heuristic_extract("hi there", false);
        assert!(result.memories.is_empty());
    }

    #[test]
    fn trivial_greeting_with_force_is_not_empty() {
        let result = heuristic_extract("hi there", true);
        assert_eq!(result.memories.len(), 1);
    }

    #[test]
    fn name_pattern_derives_fact_claim() {
        let result = heuristic_extract("My name is Alice Smith.", false);
        let memory = &result.memories[0];
        assert_eq!(memory.kind, MemoryKind::Fact);
        assert_eq!(memory.claims[0].predicate, "name");
        assert_eq!(memory.claims[0].object_value, "Alice Smith");
        assert!((memory.claims[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn favorite_pattern_normalizes_slot_name() {
        let result = heuristic_extract("My favorite Ice Cream is chocolate", false);
        let claim = &result.memories[0].claims[0];
        assert_eq!(claim.predicate, "favorite_ice_cream");
        assert_eq!(claim.object_value, "chocolate");
        assert_eq!(claim.claim_type, "preference");
    }

    #[test]
    fn no_claims_yields_note_kind() {
        let result = heuristic_extract("The weather today is quite pleasant outside", false);
        assert_eq!(result.memories[0].kind, MemoryKind::Note);
        assert!(result.memories[0].claims.is_empty());
    }

    #[test]
    fn text_truncated_to_2000_chars() {
        let long = "a".repeat(5_000);
        let result = heuristic_extract(&long, true);
        assert_eq!(result.memories[0].text.chars().count(), HEURISTIC_MEMORY_MAX_LEN);
    }

    #[test]
    fn duplicate_predicate_object_pairs_are_deduped() {
        let result = heuristic_extract("I like pizza. I like pizza.", false);
        assert_eq!(result.memories[0].claims.len(), 1);
    }
}
