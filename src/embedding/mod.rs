//! Embedding capability.
//!
//! The embedder is treated as an opaque `text -> vector | empty` function:
//! failures of any kind (missing credentials, network error, timeout) collapse
//! to an empty vector rather than propagating an error, so write paths never
//! block on embedding availability.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::Args;

/// Capability for turning text into a fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text. Returns an empty vector on any failure.
    async fn embed(&self, text: &str) -> Vec<f32>;

    /// Declared embedding dimensionality for this deployment.
    fn dimensions(&self) -> usize;

    /// Display name for observability (never inspected for branching logic).
    fn name(&self) -> &str;
}

/// Always-empty embedder, used when no embedding credentials are configured.
/// Write paths proceed; retrieval degrades to lexical-only.
pub struct NullEmbedder {
    dimensions: usize,
}

impl NullEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Embedder for NullEmbedder {
    async fn embed(&self, _text: &str) -> Vec<f32> {
        Vec::new()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// An OpenAI-compatible embeddings endpoint (OpenAI, Azure, OpenRouter, …).
#[cfg(feature = "llm")]
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

#[cfg(feature = "llm")]
impl HttpEmbedder {
    pub fn new(base_url: String, api_key: String, model: String, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
            dimensions,
        }
    }

    async fn embed_inner(&self, text: &str) -> Result<Vec<f32>, String> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "input": text,
                "model": self.model,
            }))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("embedding API error {status}: {body}"));
        }

        let data: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        let embedding = data["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| "invalid embedding response shape".to_string())?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        Ok(embedding)
    }
}

#[cfg(feature = "llm")]
#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Vec<f32> {
        match self.embed_inner(text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "embedding call failed, degrading to empty vector");
                Vec::new()
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Build the configured embedder: `HttpEmbedder` when an API key and the
/// `llm` feature are both present, `NullEmbedder` otherwise.
pub fn create_embedder(args: &Args) -> std::sync::Arc<dyn Embedder> {
    #[cfg(feature = "llm")]
    if let Some(key) = args.embedding_api_key.clone() {
        return std::sync::Arc::new(HttpEmbedder::new(
            args.embedding_base_url.clone(),
            key,
            args.embedding_model.clone(),
            args.embedding_dimensions,
        ));
    }
    std::sync::Arc::new(NullEmbedder::new(args.embedding_dimensions))
}

/// Cosine similarity between two vectors; 0.0 for mismatched or empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_basic() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn cosine_similarity_empty_is_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn null_embedder_is_always_empty() {
        let e = NullEmbedder::new(1536);
        assert!(e.embed("hello").await.is_empty());
        assert_eq!(e.dimensions(), 1536);
    }
}
