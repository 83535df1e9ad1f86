//! Running totals of domain events, printed when a command finishes.

use std::sync::Arc;

use llmcode_core::tool::ToolStatus;
use llmcode_core::{DomainEvent, EventBus};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityTotals {
    pub tokens: u64,
    pub model_turns: usize,
    pub tools_ok: usize,
    pub tools_failed: usize,
    pub tools_rejected: usize,
    pub files_indexed: usize,
    pub chunks_embedded: usize,
    pub summaries_generated: usize,
    pub errors: usize,
}

impl ActivityTotals {
    fn apply(&mut self, event: &DomainEvent) {
        match event {
            DomainEvent::ResponseGenerated { tokens_used, .. } => {
                self.model_turns += 1;
                self.tokens += u64::from(*tokens_used);
            }
            DomainEvent::ToolExecuted { status, .. } => match status {
                ToolStatus::Ok => self.tools_ok += 1,
                ToolStatus::Error => self.tools_failed += 1,
                ToolStatus::Rejected => self.tools_rejected += 1,
            },
            DomainEvent::FileIndexed { chunks, .. } => {
                self.files_indexed += 1;
                self.chunks_embedded += chunks;
            }
            DomainEvent::SummaryGenerated { .. } => self.summaries_generated += 1,
            DomainEvent::ErrorOccurred { context, error_message, .. } => {
                self.errors += 1;
                debug!(context, error = %error_message, "Error event");
            }
            DomainEvent::AgentStateChanged { .. } => {}
        }
    }

    pub fn tool_calls(&self) -> usize {
        self.tools_ok + self.tools_failed + self.tools_rejected
    }
}

/// Subscribes to a bus and tallies everything published until every
/// sender is gone.
pub struct ActivityLog {
    task: JoinHandle<ActivityTotals>,
}

impl ActivityLog {
    pub fn spawn(bus: &EventBus) -> Self {
        let mut rx = bus.subscribe();
        let task = tokio::spawn(async move {
            let mut totals = ActivityTotals::default();
            loop {
                match rx.recv().await {
                    Ok(event) => totals.apply(&event),
                    Err(RecvError::Lagged(missed)) => warn!(missed, "Activity log fell behind"),
                    Err(RecvError::Closed) => break,
                }
            }
            totals
        });
        Self { task }
    }

    /// Wait for the bus to close and return the totals. The caller must
    /// have dropped every handle to the bus.
    pub async fn finish(self) -> ActivityTotals {
        self.task.await.unwrap_or_default()
    }
}

/// Drop the last handle to `bus` and collect the totals.
pub async fn close(bus: Arc<EventBus>, log: ActivityLog) -> ActivityTotals {
    drop(bus);
    log.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn tallies_until_bus_closes() {
        let bus = Arc::new(EventBus::new(64));
        let log = ActivityLog::spawn(&bus);

        bus.publish(DomainEvent::ResponseGenerated {
            session_id: "s".into(),
            model: "m".into(),
            tokens_used: 120,
            timestamp: Utc::now(),
        });
        for status in [ToolStatus::Ok, ToolStatus::Error, ToolStatus::Rejected, ToolStatus::Ok] {
            bus.publish(DomainEvent::ToolExecuted {
                tool_name: "read_file".into(),
                status,
                duration_ms: 3,
                timestamp: Utc::now(),
            });
        }
        bus.publish(DomainEvent::FileIndexed {
            path: "a.py".into(),
            chunks: 4,
            timestamp: Utc::now(),
        });
        bus.publish(DomainEvent::SummaryGenerated {
            path: "a.py".into(),
            timestamp: Utc::now(),
        });

        let totals = close(bus, log).await;
        assert_eq!(totals.tokens, 120);
        assert_eq!(totals.model_turns, 1);
        assert_eq!((totals.tools_ok, totals.tools_failed, totals.tools_rejected), (2, 1, 1));
        assert_eq!(totals.tool_calls(), 4);
        assert_eq!(totals.files_indexed, 1);
        assert_eq!(totals.chunks_embedded, 4);
        assert_eq!(totals.summaries_generated, 1);
    }

    #[tokio::test]
    async fn quiet_bus_gives_zero_totals() {
        let bus = Arc::new(EventBus::default());
        let log = ActivityLog::spawn(&bus);
        assert_eq!(close(bus, log).await, ActivityTotals::default());
    }
}
