//! Runtime for coordinating conversation turns
//!
//! Owns the session state, performs the effects produced by the state
//! machine and runs the background poll loop.

mod executor;


use crate::conversation::{Step, Turn};
use crate::state_machine::{
    AdmissionError, CoordinatorContext, Event, SessionState, SessionStatus, DEFAULT_COOLDOWN,
};
use crate::transport::{ConversationTransport, TransportError};
use executor::Inner;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// How often the active conversation is polled while a turn is unfinished
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub poll_interval: Duration,
    pub cooldown: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Read-only view of the coordinator state
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSnapshot {
    pub conversation_id: Option<String>,
    pub turns: Vec<Turn>,
    pub is_processing: bool,
    pub error: Option<String>,
    pub status: SessionStatus,
    pub can_send_message: bool,
    /// Whole seconds since the last start/add-turn request
    pub time_since_last_request: Option<u64>,
    pub last_step_id: Option<String>,
}

impl CoordinatorSnapshot {
    pub(crate) fn capture(state: &SessionState, now: Instant) -> Self {
        Self {
            conversation_id: state.conversation_id.clone(),
            turns: state.turns.clone(),
            is_processing: state.is_processing,
            error: state.error.clone(),
            status: state.status(),
            can_send_message: state.can_send_message(),
            time_since_last_request: state.seconds_since_last_request(now),
            last_step_id: state.last_step_id.clone(),
        }
    }

    pub fn latest_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }
}

/// Updates published to subscribers
#[derive(Debug, Clone)]
pub enum CoordinatorUpdate {
    StateChange(CoordinatorSnapshot),
    /// Steps whose ids were not present in the previous turn list
    StepsObserved {
        turn_id: String,
        steps: Vec<Step>,
    },
    TurnCompleted {
        turn: Turn,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error("{message}")]
    Transport {
        message: String,
        source: TransportError,
    },
}

/// Client-side conversation coordinator.
///
/// Cheap to clone; all clones share one session. Polling stops when the
/// last clone is dropped.
pub struct Coordinator<T: ConversationTransport + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: ConversationTransport + 'static> Clone for Coordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ConversationTransport + 'static> Coordinator<T> {
    pub fn new(transport: T, config: CoordinatorConfig) -> Self {
        let context = CoordinatorContext {
            cooldown: config.cooldown,
        };
        Self {
            inner: Arc::new(Inner::new(transport, context, config.poll_interval)),
        }
    }

    /// Start a new conversation with an initial prompt.
    ///
    /// Succeeds once the backend accepted the turn; completion is observed by
    /// polling.
    pub async fn start_conversation(&self, context_path: &str, prompt: &str) -> Result<(), CoordinatorError> {
        self.inner
            .submit(Event::StartRequested {
                context_path: context_path.to_string(),
                prompt: prompt.to_string(),
                at: Instant::now(),
            })
            .await
    }

    /// Add a turn to the active conversation. `force` bypasses the cooldown
    /// and the still-processing guard, and asks the backend to do the same.
    pub async fn add_turn(&self, prompt: &str, force: bool) -> Result<(), CoordinatorError> {
        self.inner
            .submit(Event::AddTurnRequested {
                prompt: prompt.to_string(),
                force,
                at: Instant::now(),
            })
            .await
    }

    /// Forget the current conversation and stop polling
    pub fn reset_conversation(&self) {
        // Reset is always admitted
        let _ = self.inner.apply(Event::Reset);
    }

    /// Pick up the backend's active conversation, if any.
    ///
    /// Returns `Ok(false)` when there is none.
    pub async fn resume_active_conversation(&self) -> Result<bool, CoordinatorError> {
        self.inner.resume().await
    }

    /// Adopt a specific conversation by id
    pub async fn load_conversation(&self, conversation_id: &str) -> Result<(), CoordinatorError> {
        self.inner.load(conversation_id).await
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        self.inner.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorUpdate> {
        self.inner.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.snapshot().status
    }

    pub fn can_send_message(&self) -> bool {
        self.snapshot().can_send_message
    }

    /// Stop background polling
    pub fn shutdown(&self) {
        self.inner.stop_polling();
    }
}
