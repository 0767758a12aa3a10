//! Effects produced by state transitions

use crate::conversation::{Step, Turn};

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// `POST /conversation`
    CreateConversation {
        session_epoch: u64,
        context_path: String,
        prompt: String,
    },

    /// `POST /conversation/{id}/turn`
    AddConversationTurn {
        session_epoch: u64,
        conversation_id: String,
        prompt: String,
        force: bool,
    },

    /// Replace any running poll loop with one tagged `poll_epoch`
    StartPolling {
        conversation_id: String,
        poll_epoch: u64,
    },

    /// Stop the poll loop (idempotent)
    StopPolling,

    /// Publish a fresh snapshot to observers
    NotifyStateChange,

    /// Steps seen for the first time
    NotifySteps { turn_id: String, steps: Vec<Step> },

    NotifyTurnCompleted { turn: Turn },

    NotifyError { message: String },
}

impl Effect {
    /// Whether performing this effect needs network I/O
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Effect::CreateConversation { .. } | Effect::AddConversationTurn { .. }
        )
    }

    pub fn notify_error(message: impl Into<String>) -> Self {
        Effect::NotifyError {
            message: message.into(),
        }
    }
}
