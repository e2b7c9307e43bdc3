//! Orchestrators: the only code paths allowed to mutate memories, claims,
//! and slot_state directly.

pub mod claim;
pub mod memory;

pub use memory::MemoryOrchestrator;
