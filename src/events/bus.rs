//! In-process pub/sub keyed by `(project_id, subject_id | "*")`.
//!
//! A `tokio::sync::broadcast` channel carries every event for a project;
//! each subscriber stores its own subject filter and applies it on receive,
//! so delivery never runs arbitrary subscriber code inside the emitting
//! caller's critical section — a slow or panicking consumer cannot block
//! `emit`.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::types::{EventType, LifecycleEvent};

const CHANNEL_CAPACITY: usize = 1024;

/// Topic-keyed event bus. Cloning shares the same underlying registry.
#[derive(Clone)]
pub struct EventBus {
    projects: std::sync::Arc<RwLock<HashMap<String, broadcast::Sender<LifecycleEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            projects: std::sync::Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn sender_for(&self, project_id: &str) -> broadcast::Sender<LifecycleEvent> {
        if let Some(tx) = self.projects.read().get(project_id) {
            return tx.clone();
        }
        let mut projects = self.projects.write();
        projects
            .entry(project_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Register a subscriber. `subject = None` means project-wide wildcard:
    /// the subscriber receives events for every subject in the project.
    pub fn subscribe(&self, project_id: &str, subject: Option<String>) -> Subscription {
        let tx = self.sender_for(project_id);
        Subscription {
            receiver: tx.subscribe(),
            subject,
        }
    }

    /// Dispatch an event to every subscriber registered on this project,
    /// exact-subject or wildcard. Subscribers filter on receive.
    pub fn emit(
        &self,
        project_id: &str,
        subject_id: Option<&str>,
        event_type: EventType,
        data: serde_json::Value,
    ) {
        let tx = self.sender_for(project_id);
        let event = LifecycleEvent::new(event_type, project_id, subject_id.map(String::from), data);
        // `send` only fails when there are no receivers; that is not an error.
        let _ = tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription. Drop (or [`Subscription::unsubscribe`]) tears it down;
/// both are idempotent since the receiver is consumed by value.
pub struct Subscription {
    receiver: broadcast::Receiver<LifecycleEvent>,
    subject: Option<String>,
}

impl Subscription {
    fn matches(&self, event: &LifecycleEvent) -> bool {
        match &self.subject {
            None => true,
            Some(s) => event.subject_id.as_deref() == Some(s.as_str()),
        }
    }

    /// Await the next matching event. Returns `None` once the bus side has
    /// been dropped entirely (never happens in practice; the registry holds
    /// a sender for the lifetime of the process).
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Explicit, idempotent unsubscribe (consumes `self`).
    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exact_subject_subscriber_only_sees_its_subject() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("proj", Some("alice".to_string()));

        bus.emit("proj", Some("bob"), EventType::MemoryCreated, serde_json::json!({}));
        bus.emit(
            "proj",
            Some("alice"),
            EventType::MemoryCreated,
            serde_json::json!({"id": "mem_1"}),
        );

        let event = sub.recv().await.unwrap();
        assert_eq!(event.subject_id.as_deref(), Some("alice"));
        assert_eq!(event.data["id"], "mem_1");
    }

    #[tokio::test]
    async fn wildcard_subscriber_sees_every_subject() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("proj", None);

        bus.emit("proj", Some("bob"), EventType::MemoryCreated, serde_json::json!({}));
        bus.emit("proj", Some("alice"), EventType::MemoryCreated, serde_json::json!({}));

        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_some());
    }

    #[tokio::test]
    async fn different_projects_are_isolated() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("proj-a", None);
        bus.emit("proj-b", None, EventType::MemoryCreated, serde_json::json!({}));

        let result = tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await;
        assert!(result.is_err(), "subscriber on proj-a must not see proj-b events");
    }
}
