//! Verity — a memory-and-claim substrate for LLM-driven applications.
//!
//! A stateless HTTP service, backed by SQLite with vector-similarity search,
//! that persists per-subject durable memories, derives structured claims
//! from them, and maintains a live truth state where each semantic slot has
//! at most one active winning claim.

pub mod config;
pub mod embedding;
pub mod error;
pub mod events;
pub mod extraction;
pub mod http;
pub mod llm;
pub mod orchestrator;
pub mod retrieval;
pub mod sse;
pub mod storage;
pub mod telemetry;
pub mod types;

pub use error::{AppError, Result};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
