//! Domain events: decoupled notifications between the loop, the index
//! and whoever is watching (the CLI activity totals, tests).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::tool::ToolStatus;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A model turn finished streaming
    ResponseGenerated {
        session_id: String,
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool call was resolved
    ToolExecuted {
        tool_name: String,
        status: ToolStatus,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A file was (re)chunked and embedded
    FileIndexed {
        path: String,
        chunks: usize,
        timestamp: DateTime<Utc>,
    },

    /// A summary was regenerated
    SummaryGenerated {
        path: String,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// The agent loop moved to another state
    AgentStateChanged {
        state: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolExecuted {
            tool_name: "run_command".into(),
            status: ToolStatus::Error,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted { tool_name, status, .. } => {
                assert_eq!(tool_name, "run_command");
                assert_eq!(*status, ToolStatus::Error);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(DomainEvent::AgentStateChanged {
            state: "idle".into(),
            timestamp: Utc::now(),
        });
    }
}
