//! The seam between the agent loop and whoever is watching it.

use async_trait::async_trait;
use llmcode_tools::PendingEffect;

use crate::stream_event::AgentEvent;

/// The user's answer to a confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// Receives agent events and answers confirmations.
///
/// `confirm` may block for as long as the user needs; the loop races it
/// against cancellation.
#[async_trait]
pub trait Frontend: Send + Sync {
    fn on_event(&self, event: &AgentEvent);

    async fn confirm(&self, effect: &PendingEffect) -> Decision;
}

/// Ignores events and answers every confirmation the same way.
pub struct Unattended(pub Decision);

#[async_trait]
impl Frontend for Unattended {
    fn on_event(&self, _event: &AgentEvent) {}

    async fn confirm(&self, _effect: &PendingEffect) -> Decision {
        self.0
    }
}
