//! Events that can occur in a coordinator session

use crate::conversation::{Conversation, TurnReceipt};
use crate::transport::TransportError;
use tokio::time::Instant;

/// Which turn-initiating request a result belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    StartConversation,
    AddTurn,
}

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    StartRequested {
        context_path: String,
        prompt: String,
        at: Instant,
    },
    AddTurnRequested {
        prompt: String,
        force: bool,
        at: Instant,
    },
    Reset,

    // Submission results
    TurnAccepted {
        request: RequestKind,
        session_epoch: u64,
        receipt: TurnReceipt,
    },
    RequestFailed {
        request: RequestKind,
        session_epoch: u64,
        error: TransportError,
    },

    // Polling results
    PollSucceeded {
        poll_epoch: u64,
        conversation: Conversation,
    },
    PollFailed {
        poll_epoch: u64,
        error: TransportError,
    },

    /// An existing conversation fetched from the backend (resume or load)
    ConversationAdopted { conversation: Conversation },
}
