//! Coordinator session state

use super::event::RequestKind;
use crate::conversation::Turn;
use std::time::Duration;
use tokio::time::Instant;

/// Client-side rate limit between turn-initiating requests
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Derived conversation status shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No conversation started
    Idle,
    /// A turn request is in flight or its turn has not completed yet
    Processing,
    /// Latest turn completed and nothing is in flight
    Completed,
    /// Conversation exists but the latest turn is not known to be complete
    Pending,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Pending => "pending",
        }
    }
}

/// Process-wide conversation state for one client session.
///
/// Changed through [`super::transition`], except that the executor records
/// local rejections in `error`. Cleared entirely by a reset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub conversation_id: Option<String>,
    /// Replaced wholesale by every poll response that carries turns
    pub turns: Vec<Turn>,
    /// True from a turn-initiating request until its turn completes
    pub is_processing: bool,
    /// Last observed error; overwritten by each new operation
    pub error: Option<String>,
    /// When the last start/add-turn request was issued
    pub last_request_at: Option<Instant>,
    /// Polling cursor: id of the last step of the last observed turn
    pub last_step_id: Option<String>,
    /// Create/add-turn call that has not returned yet
    pub pending_request: Option<RequestKind>,
    pub polling: bool,
    /// Bumped by every reset; request results from older sessions are dropped
    pub session_epoch: u64,
    /// Bumped whenever polling (re)starts; older poll results are dropped
    pub poll_epoch: u64,
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        if self.conversation_id.is_none() {
            SessionStatus::Idle
        } else if self.is_processing {
            SessionStatus::Processing
        } else if self.latest_turn().is_some_and(Turn::is_completed) {
            SessionStatus::Completed
        } else {
            SessionStatus::Pending
        }
    }

    /// Whether the user may submit a message
    pub fn can_send_message(&self) -> bool {
        matches!(self.status(), SessionStatus::Idle | SessionStatus::Completed)
    }

    pub fn latest_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Whole seconds since the last turn-initiating request
    pub fn seconds_since_last_request(&self, now: Instant) -> Option<u64> {
        self.last_request_at
            .map(|at| now.saturating_duration_since(at).as_secs())
    }
}

/// Immutable coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorContext {
    pub cooldown: Duration,
}

impl Default for CoordinatorContext {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}
