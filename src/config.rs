//! Runtime configuration, loaded from CLI flags and environment variables.

use clap::Parser;

/// How the service selects an LLM capability for classification, reranking
/// and extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum AiMode {
    /// Prefer the primary LLM, then the secondary, then the simple path.
    Auto,
    PrimaryLlm,
    SecondaryLlm,
    /// Never call an LLM; retrieval runs `simple`, extraction runs heuristic.
    Simple,
}

impl Default for AiMode {
    fn default() -> Self {
        AiMode::Auto
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "verity-server")]
#[command(about = "Verity memory-and-claim substrate HTTP service")]
pub struct Args {
    /// SQLite database path (`:memory:` for an ephemeral store).
    #[arg(long, env = "VERITY_DB_PATH", default_value = "~/.local/share/verity/verity.db")]
    pub db_path: String,

    /// Address to bind the HTTP server to.
    #[arg(long, env = "VERITY_BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: String,

    /// Port to bind the HTTP server to.
    #[arg(long, env = "VERITY_BIND_PORT", default_value = "8080")]
    pub bind_port: u16,

    /// Default project id used when `X-Project-Id` is absent.
    #[arg(long, env = "VERITY_DEFAULT_PROJECT_ID")]
    pub default_project_id: Option<String>,

    /// LLM selection strategy.
    #[arg(long, env = "VERITY_AI_MODE", value_enum, default_value = "auto")]
    pub ai_mode: AiMode,

    /// Gate the LLM-expanded retrieval pipeline (search only; extraction
    /// always uses an LLM if one is configured).
    #[arg(long, env = "VERITY_USE_RETRIEVAL_EXPAND", default_value = "true")]
    pub use_retrieval_expand: bool,

    /// Model name passed through to the selected LLM for retrieval calls.
    #[arg(long, env = "VERITY_RETRIEVAL_MODEL", default_value = "gpt-4o-mini")]
    pub retrieval_model: String,

    /// Embedding API key. Absent => embedder always returns empty vectors.
    #[arg(long, env = "VERITY_EMBEDDING_API_KEY")]
    pub embedding_api_key: Option<String>,

    /// OpenAI-compatible base URL for the embedder.
    #[arg(
        long,
        env = "VERITY_EMBEDDING_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    pub embedding_base_url: String,

    /// Embedding model name.
    #[arg(long, env = "VERITY_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    pub embedding_model: String,

    /// Embedding dimensionality (spec assumes 1536-d).
    #[arg(long, env = "VERITY_EMBEDDING_DIMENSIONS", default_value = "1536")]
    pub embedding_dimensions: usize,

    /// Primary LLM API key. Absent => LLM capability is `none`.
    #[arg(long, env = "VERITY_LLM_API_KEY")]
    pub llm_api_key: Option<String>,

    /// OpenAI-compatible base URL for the primary LLM.
    #[arg(long, env = "VERITY_LLM_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub llm_base_url: String,

    /// Secondary (fallback) LLM API key, tried when the primary fails or is
    /// absent and `ai_mode` is `auto`.
    #[arg(long, env = "VERITY_SECONDARY_LLM_API_KEY")]
    pub secondary_llm_api_key: Option<String>,

    /// OpenAI-compatible base URL for the secondary LLM.
    #[arg(
        long,
        env = "VERITY_SECONDARY_LLM_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    pub secondary_llm_base_url: String,
}

impl Args {
    /// Expand a leading `~` in `db_path` the way a local CLI tool would.
    pub fn expanded_db_path(&self) -> String {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest).to_string_lossy().into_owned();
            }
        }
        self.db_path.clone()
    }
}
