//! Coordinator executor
//!
//! Applies state machine transitions under a single lock, runs the
//! synchronous effects in place and hands request effects back to the
//! caller so no lock is held across network I/O.

use super::{CoordinatorError, CoordinatorSnapshot, CoordinatorUpdate};
use crate::conversation::Conversation;
use crate::state_machine::{
    failure_message, transition, AdmissionError, CoordinatorContext, Effect, Event, RequestKind, SessionState,
};
use crate::transport::{ConversationTransport, TransportError, TransportErrorKind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const UPDATE_CHANNEL_CAPACITY: usize = 128;

struct PollerHandle {
    poll_epoch: u64,
    cancel: CancellationToken,
}

struct Core {
    state: SessionState,
    poller: Option<PollerHandle>,
}

pub(super) struct Inner<T> {
    context: CoordinatorContext,
    poll_interval: Duration,
    transport: T,
    core: Mutex<Core>,
    updates: broadcast::Sender<CoordinatorUpdate>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(poller) = core.poller.take() {
            poller.cancel.cancel();
        }
    }
}

impl<T: ConversationTransport + 'static> Inner<T> {
    pub(super) fn new(transport: T, context: CoordinatorContext, poll_interval: Duration) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            context,
            poll_interval,
            transport,
            core: Mutex::new(Core {
                state: SessionState::default(),
                poller: None,
            }),
            updates,
        }
    }

    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot::capture(&self.lock_core().state, Instant::now())
    }

    pub(super) fn subscribe(&self) -> broadcast::Receiver<CoordinatorUpdate> {
        self.updates.subscribe()
    }

    fn publish(&self, update: CoordinatorUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    /// Run one event through the state machine.
    ///
    /// Polling and notification effects are performed before returning;
    /// request effects are returned for the caller to perform.
    pub(super) fn apply(self: &Arc<Self>, event: Event) -> Result<Vec<Effect>, AdmissionError> {
        let mut core = self.lock_core();

        let result = match transition(&core.state, &self.context, event) {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(error = %e, "Request rejected locally");
                self.record_error(&mut core, e.to_string());
                return Err(e);
            }
        };

        core.state = result.new_state;

        let mut requests = Vec::new();
        for effect in result.effects {
            match effect {
                Effect::CreateConversation { .. } | Effect::AddConversationTurn { .. } => {
                    requests.push(effect);
                }
                Effect::StartPolling {
                    conversation_id,
                    poll_epoch,
                } => self.start_poller(&mut core, conversation_id, poll_epoch),
                Effect::StopPolling => Self::stop_poller(&mut core),
                Effect::NotifyStateChange => {
                    self.publish(CoordinatorUpdate::StateChange(CoordinatorSnapshot::capture(
                        &core.state,
                        Instant::now(),
                    )));
                }
                Effect::NotifySteps { turn_id, steps } => {
                    self.publish(CoordinatorUpdate::StepsObserved { turn_id, steps });
                }
                Effect::NotifyTurnCompleted { turn } => {
                    tracing::info!(turn_id = %turn.turn_id, "Turn completed");
                    self.publish(CoordinatorUpdate::TurnCompleted { turn });
                }
                Effect::NotifyError { message } => {
                    self.publish(CoordinatorUpdate::Error { message });
                }
            }
        }

        Ok(requests)
    }

    /// Put a message in the error slot without any other state change
    fn record_error(&self, core: &mut Core, message: String) {
        core.state.error = Some(message.clone());
        self.publish(CoordinatorUpdate::Error { message });
        self.publish(CoordinatorUpdate::StateChange(CoordinatorSnapshot::capture(
            &core.state,
            Instant::now(),
        )));
    }

    /// Apply a user event and perform any request it produces
    pub(super) async fn submit(self: &Arc<Self>, event: Event) -> Result<(), CoordinatorError> {
        for effect in self.apply(event)? {
            self.perform(effect).await?;
        }
        Ok(())
    }

    async fn perform(self: &Arc<Self>, effect: Effect) -> Result<(), CoordinatorError> {
        let (request, session_epoch, outcome) = match effect {
            Effect::CreateConversation {
                session_epoch,
                context_path,
                prompt,
            } => (
                RequestKind::StartConversation,
                session_epoch,
                self.transport.create_conversation(&context_path, &prompt).await,
            ),
            Effect::AddConversationTurn {
                session_epoch,
                conversation_id,
                prompt,
                force,
            } => (
                RequestKind::AddTurn,
                session_epoch,
                self.transport
                    .add_conversation_turn(&conversation_id, &prompt, force)
                    .await,
            ),
            _ => return Ok(()),
        };

        match outcome {
            Ok(receipt) => {
                tracing::info!(
                    conversation_id = %receipt.conversation_id,
                    turn_id = %receipt.turn_id,
                    ?request,
                    "Turn accepted"
                );
                self.apply(Event::TurnAccepted {
                    request,
                    session_epoch,
                    receipt,
                })?;
                Ok(())
            }
            Err(error) => {
                let message = failure_message(request, &error);
                self.apply(Event::RequestFailed {
                    request,
                    session_epoch,
                    error: error.clone(),
                })?;
                Err(CoordinatorError::Transport { message, source: error })
            }
        }
    }

    pub(super) async fn resume(self: &Arc<Self>) -> Result<bool, CoordinatorError> {
        match self.transport.fetch_active_conversation(None).await {
            Ok(conversation) => {
                self.adopt(conversation)?;
                Ok(true)
            }
            Err(error) if error.kind == TransportErrorKind::NotFound => {
                tracing::debug!("No active conversation to resume");
                Ok(false)
            }
            Err(error) => Err(self.fetch_failed(error)),
        }
    }

    pub(super) async fn load(self: &Arc<Self>, conversation_id: &str) -> Result<(), CoordinatorError> {
        match self.transport.fetch_conversation(conversation_id).await {
            Ok(conversation) => self.adopt(conversation),
            Err(error) => Err(self.fetch_failed(error)),
        }
    }

    fn adopt(self: &Arc<Self>, conversation: Conversation) -> Result<(), CoordinatorError> {
        let conversation_id = conversation.id.clone();
        self.apply(Event::ConversationAdopted { conversation })?;
        tracing::info!(conversation_id = %conversation_id, "Adopted conversation");
        Ok(())
    }

    fn fetch_failed(&self, error: TransportError) -> CoordinatorError {
        tracing::warn!(error = %error, "Failed to fetch conversation");
        self.record_error(&mut self.lock_core(), error.message.clone());
        CoordinatorError::Transport {
            message: error.message.clone(),
            source: error,
        }
    }

    // ========================================================================
    // Polling
    // ========================================================================

    fn start_poller(self: &Arc<Self>, core: &mut Core, conversation_id: String, poll_epoch: u64) {
        Self::stop_poller(core);

        let cancel = CancellationToken::new();
        tracing::info!(conversation_id = %conversation_id, poll_epoch, "Polling started");
        tokio::spawn(poll_loop(
            Arc::downgrade(self),
            conversation_id,
            poll_epoch,
            self.poll_interval,
            cancel.clone(),
        ));
        core.poller = Some(PollerHandle { poll_epoch, cancel });
    }

    fn stop_poller(core: &mut Core) {
        if let Some(poller) = core.poller.take() {
            tracing::info!(poll_epoch = poller.poll_epoch, "Polling stopped");
            poller.cancel.cancel();
        }
    }

    pub(super) fn stop_polling(&self) {
        Self::stop_poller(&mut self.lock_core());
    }

    fn poll_cursor(&self) -> Option<String> {
        self.lock_core().state.last_step_id.clone()
    }
}

/// Fetch the active conversation every `period` until cancelled or the
/// coordinator is gone. At most one fetch is outstanding at a time.
async fn poll_loop<T: ConversationTransport + 'static>(
    inner: Weak<Inner<T>>,
    conversation_id: String,
    poll_epoch: u64,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let cursor = inner.poll_cursor();

        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = inner.transport.fetch_active_conversation(cursor.as_deref()) => match result {
                Ok(conversation) => Event::PollSucceeded { poll_epoch, conversation },
                Err(error) => {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        error = %error,
                        transient = error.kind.is_transient(),
                        "Poll failed"
                    );
                    Event::PollFailed { poll_epoch, error }
                }
            },
        };

        // Poll results are never rejected
        let _ = inner.apply(event);
    }

    tracing::debug!(conversation_id = %conversation_id, poll_epoch, "Poll loop exited");
}
