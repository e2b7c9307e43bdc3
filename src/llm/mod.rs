//! LLM capability.
//!
//! The LLM is treated as an opaque `JSON-in -> JSON-out` caller bounded by a
//! per-call deadline. Callers never inspect provider identity beyond
//! [`LlmClient::name`] for observability; variants are expressed as tagged
//! values (primary/secondary/none) rather than a subclass hierarchy.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AiMode, Args};

/// One structured-JSON call to an LLM.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: String,
    pub user: String,
    pub json_mode: bool,
    pub deadline: Duration,
    pub temperature: f32,
}

impl LlmRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>, deadline: Duration) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            json_mode: true,
            deadline,
            temperature: 0.0,
        }
    }
}

/// Capability for issuing a single structured-JSON call to an LLM.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Returns `None` on timeout, network failure, or unparseable output.
    async fn call_json(&self, req: LlmRequest) -> Option<serde_json::Value>;

    /// Display name for observability.
    fn name(&self) -> &str;
}

/// No LLM configured (or `ai_mode=simple`): every call degrades immediately.
pub struct NullLlmClient;

#[async_trait]
impl LlmClient for NullLlmClient {
    async fn call_json(&self, _req: LlmRequest) -> Option<serde_json::Value> {
        None
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// An OpenAI-compatible chat-completions endpoint.
#[cfg(feature = "llm")]
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    display_name: String,
}

#[cfg(feature = "llm")]
impl HttpLlmClient {
    pub fn new(base_url: String, api_key: String, model: String, display_name: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
            display_name,
        }
    }

    async fn call_inner(&self, req: &LlmRequest) -> Result<serde_json::Value, String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": req.temperature,
            "messages": [
                {"role": "system", "content": req.system},
                {"role": "user", "content": req.user},
            ],
        });
        if req.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("LLM API error {status}: {text}"));
        }

        let data: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| "missing message content".to_string())?;
        serde_json::from_str(content).map_err(|e| format!("unparseable JSON content: {e}"))
    }
}

#[cfg(feature = "llm")]
#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn call_json(&self, req: LlmRequest) -> Option<serde_json::Value> {
        let deadline = req.deadline;
        match tokio::time::timeout(deadline, self.call_inner(&req)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, model = %self.display_name, "LLM call failed");
                None
            }
            Err(_) => {
                tracing::warn!(model = %self.display_name, deadline_ms = deadline.as_millis(), "LLM call timed out");
                None
            }
        }
    }

    fn name(&self) -> &str {
        &self.display_name
    }
}

/// Tries a primary client, then a secondary, per `ai_mode=auto`.
pub struct FallbackLlmClient {
    primary: Option<Arc<dyn LlmClient>>,
    secondary: Option<Arc<dyn LlmClient>>,
}

#[async_trait]
impl LlmClient for FallbackLlmClient {
    async fn call_json(&self, req: LlmRequest) -> Option<serde_json::Value> {
        if let Some(primary) = &self.primary {
            if let Some(v) = primary.call_json(req.clone()).await {
                return Some(v);
            }
        }
        if let Some(secondary) = &self.secondary {
            return secondary.call_json(req).await;
        }
        None
    }

    fn name(&self) -> &str {
        self.primary
            .as_ref()
            .map(|p| p.name())
            .or_else(|| self.secondary.as_ref().map(|s| s.name()))
            .unwrap_or("none")
    }
}

/// Build the configured LLM client from `ai_mode` and the available credentials.
pub fn create_llm_client(args: &Args) -> Arc<dyn LlmClient> {
    #[cfg(feature = "llm")]
    {
        let primary = args.llm_api_key.clone().map(|key| {
            Arc::new(HttpLlmClient::new(
                args.llm_base_url.clone(),
                key,
                args.retrieval_model.clone(),
                "primary".to_string(),
            )) as Arc<dyn LlmClient>
        });
        let secondary = args.secondary_llm_api_key.clone().map(|key| {
            Arc::new(HttpLlmClient::new(
                args.secondary_llm_base_url.clone(),
                key,
                args.retrieval_model.clone(),
                "secondary".to_string(),
            )) as Arc<dyn LlmClient>
        });

        return match args.ai_mode {
            AiMode::Simple => Arc::new(NullLlmClient),
            AiMode::PrimaryLlm => primary.unwrap_or_else(|| Arc::new(NullLlmClient)),
            AiMode::SecondaryLlm => secondary.unwrap_or_else(|| Arc::new(NullLlmClient)),
            AiMode::Auto => Arc::new(FallbackLlmClient { primary, secondary }),
        };
    }
    #[cfg(not(feature = "llm"))]
    {
        let _ = args;
        Arc::new(NullLlmClient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_client_always_degrades() {
        let client = NullLlmClient;
        let req = LlmRequest::new("sys", "user", Duration::from_secs(1));
        assert!(client.call_json(req).await.is_none());
    }

    #[tokio::test]
    async fn fallback_uses_secondary_when_primary_absent() {
        struct Echo(serde_json::Value);
        #[async_trait]
        impl LlmClient for Echo {
            async fn call_json(&self, _req: LlmRequest) -> Option<serde_json::Value> {
                Some(self.0.clone())
            }
            fn name(&self) -> &str {
                "echo"
            }
        }

        let fallback = FallbackLlmClient {
            primary: None,
            secondary: Some(Arc::new(Echo(serde_json::json!({"mode": "indirect"})))),
        };
        let req = LlmRequest::new("sys", "user", Duration::from_secs(1));
        let result = fallback.call_json(req).await.unwrap();
        assert_eq!(result["mode"], "indirect");
    }
}
