//! Lifecycle event types emitted by the memory/claim orchestrators and the
//! SSE adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event types dispatched over the bus or the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "memory.created")]
    MemoryCreated,
    #[serde(rename = "memory.superseded")]
    MemorySuperseded,
    #[serde(rename = "memory.updated")]
    MemoryUpdated,
    #[serde(rename = "memory.deleted")]
    MemoryDeleted,
    /// Control event sent once per SSE connection before any lifecycle event.
    #[serde(rename = "connected")]
    Connected,
    /// Control event sent every 30s on an idle SSE connection.
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

impl EventType {
    /// The wire string used in the SSE `event:` line.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MemoryCreated => "memory.created",
            EventType::MemorySuperseded => "memory.superseded",
            EventType::MemoryUpdated => "memory.updated",
            EventType::MemoryDeleted => "memory.deleted",
            EventType::Connected => "connected",
            EventType::Heartbeat => "heartbeat",
        }
    }
}

/// A lifecycle event dispatched by the [`super::bus::EventBus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub project_id: String,
    pub subject_id: Option<String>,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        event_type: EventType,
        project_id: impl Into<String>,
        subject_id: Option<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            project_id: project_id.into(),
            subject_id,
            data,
            timestamp: Utc::now(),
        }
    }
}
