//! Pure state transition function
//!
//! Given the same state, context and event this always produces the same
//! result; all I/O is expressed as returned effects.

use super::event::RequestKind;
use super::{CoordinatorContext, Effect, Event, SessionState};
use crate::conversation::{Conversation, Step, Turn};
use crate::transport::TransportError;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

const STILL_PROCESSING_MESSAGE: &str = "Previous turn is still processing. Please wait.";
const FORCE_HINT_MESSAGE: &str = "Previous turn may be stuck. You can force a new turn if needed.";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    #[must_use]
    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Operation named in a cooldown message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownAction {
    StartConversation,
    AddTurn,
}

impl fmt::Display for CooldownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CooldownAction::StartConversation => f.write_str("starting a new conversation"),
            CooldownAction::AddTurn => f.write_str("adding a new turn"),
        }
    }
}

/// Local admission rejections. These never reach the network and leave
/// everything but the error slot untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("Please wait {remaining_secs} seconds before {action}.")]
    Cooldown {
        remaining_secs: u64,
        action: CooldownAction,
    },
    #[error("Previous turn is still processing. Please wait.")]
    PreviousTurnProcessing,
    #[error("No active conversation. Start a new one first.")]
    NoActiveConversation,
    #[error("A request is already in flight. Please wait.")]
    RequestInFlight,
    #[error("A conversation is already active. Reset it first.")]
    ConversationActive,
}

/// User-facing text for a failed start/add-turn request
pub fn failure_message(request: RequestKind, error: &TransportError) -> String {
    match request {
        RequestKind::AddTurn if error.message.contains("still processing") => {
            STILL_PROCESSING_MESSAGE.to_string()
        }
        RequestKind::AddTurn if error.message.contains("force=true") => FORCE_HINT_MESSAGE.to_string(),
        _ if error.message.is_empty() => match request {
            RequestKind::StartConversation => "Failed to start conversation".to_string(),
            RequestKind::AddTurn => "Failed to add turn".to_string(),
        },
        _ => error.message.clone(),
    }
}

fn remaining_whole_secs(remaining: Duration) -> u64 {
    remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
}

fn check_cooldown(
    state: &SessionState,
    context: &CoordinatorContext,
    at: Instant,
    action: CooldownAction,
) -> Result<(), AdmissionError> {
    let Some(last) = state.last_request_at else {
        return Ok(());
    };
    let elapsed = at.saturating_duration_since(last);
    if elapsed < context.cooldown {
        return Err(AdmissionError::Cooldown {
            remaining_secs: remaining_whole_secs(context.cooldown - elapsed),
            action,
        });
    }
    Ok(())
}

/// Steps in `incoming` whose ids were not present in `previous`, grouped per turn
fn newly_observed_steps(previous: &[Turn], incoming: &[Turn]) -> Vec<(String, Vec<Step>)> {
    let seen: HashSet<(&str, &str)> = previous
        .iter()
        .flat_map(|turn| {
            turn.steps
                .iter()
                .map(move |step| (turn.turn_id.as_str(), step.step_id.as_str()))
        })
        .collect();

    incoming
        .iter()
        .filter_map(|turn| {
            let fresh: Vec<Step> = turn
                .steps
                .iter()
                .filter(|step| !seen.contains(&(turn.turn_id.as_str(), step.step_id.as_str())))
                .cloned()
                .collect();
            (!fresh.is_empty()).then(|| (turn.turn_id.clone(), fresh))
        })
        .collect()
}

/// Pure transition function
#[allow(clippy::too_many_lines)] // One arm per event
pub fn transition(
    state: &SessionState,
    context: &CoordinatorContext,
    event: Event,
) -> Result<TransitionResult, AdmissionError> {
    match event {
        // ============================================================
        // Start a conversation
        // ============================================================
        Event::StartRequested {
            context_path,
            prompt,
            at,
        } => {
            if state.pending_request.is_some() {
                return Err(AdmissionError::RequestInFlight);
            }
            check_cooldown(state, context, at, CooldownAction::StartConversation)?;

            let new_state = SessionState {
                error: None,
                is_processing: true,
                last_request_at: Some(at),
                pending_request: Some(RequestKind::StartConversation),
                // Any current conversation keeps polling until the new one is accepted
                ..state.clone()
            };
            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::NotifyStateChange)
                .with_effect(Effect::CreateConversation {
                    session_epoch: state.session_epoch,
                    context_path,
                    prompt,
                }))
        }

        // ============================================================
        // Continue a conversation
        // ============================================================
        Event::AddTurnRequested { prompt, force, at } => {
            let Some(conversation_id) = state.conversation_id.clone() else {
                return Err(AdmissionError::NoActiveConversation);
            };
            if state.pending_request.is_some() {
                return Err(AdmissionError::RequestInFlight);
            }
            // Force overrides both local guards, mirroring the server override
            if !force {
                if state.latest_turn().is_some_and(|turn| !turn.is_completed()) {
                    return Err(AdmissionError::PreviousTurnProcessing);
                }
                check_cooldown(state, context, at, CooldownAction::AddTurn)?;
            }

            let new_state = SessionState {
                error: None,
                is_processing: true,
                last_request_at: Some(at),
                pending_request: Some(RequestKind::AddTurn),
                ..state.clone()
            };
            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::NotifyStateChange)
                .with_effect(Effect::AddConversationTurn {
                    session_epoch: state.session_epoch,
                    conversation_id,
                    prompt,
                    force,
                }))
        }

        // ============================================================
        // Submission results
        // ============================================================
        Event::TurnAccepted {
            request,
            session_epoch,
            receipt,
        } => {
            if session_epoch != state.session_epoch || state.pending_request != Some(request) {
                return Ok(TransitionResult::new(state.clone()));
            }

            let mut new_state = state.clone();
            new_state.pending_request = None;
            if request == RequestKind::StartConversation {
                new_state.conversation_id = Some(receipt.conversation_id);
                new_state.turns.clear();
                new_state.last_step_id = None;
            }
            let Some(conversation_id) = new_state.conversation_id.clone() else {
                return Ok(TransitionResult::new(new_state));
            };
            new_state.polling = true;
            new_state.poll_epoch = state.poll_epoch + 1;
            let poll_epoch = new_state.poll_epoch;

            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::StartPolling {
                    conversation_id,
                    poll_epoch,
                })
                .with_effect(Effect::NotifyStateChange))
        }

        Event::RequestFailed {
            request,
            session_epoch,
            error,
        } => {
            if session_epoch != state.session_epoch || state.pending_request != Some(request) {
                return Ok(TransitionResult::new(state.clone()));
            }

            let message = failure_message(request, &error);
            let new_state = SessionState {
                error: Some(message.clone()),
                is_processing: false,
                pending_request: None,
                ..state.clone()
            };
            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::notify_error(message))
                .with_effect(Effect::NotifyStateChange))
        }

        // ============================================================
        // Polling
        // ============================================================
        Event::PollSucceeded {
            poll_epoch,
            conversation,
        } => {
            let current = state.polling
                && poll_epoch == state.poll_epoch
                && state.conversation_id.as_deref() == Some(conversation.id.as_str());
            if !current || conversation.turns.is_empty() {
                return Ok(TransitionResult::new(state.clone()));
            }
            Ok(apply_poll(state, conversation))
        }

        Event::PollFailed { poll_epoch, error } => {
            if !state.polling || poll_epoch != state.poll_epoch {
                return Ok(TransitionResult::new(state.clone()));
            }
            // Transient failures never stop the loop
            let new_state = SessionState {
                error: Some(error.message.clone()),
                ..state.clone()
            };
            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::notify_error(error.message))
                .with_effect(Effect::NotifyStateChange))
        }

        // ============================================================
        // Resume / load
        // ============================================================
        Event::ConversationAdopted { conversation } => {
            if state.pending_request.is_some() {
                return Err(AdmissionError::RequestInFlight);
            }
            if state.conversation_id.is_some() {
                return Err(AdmissionError::ConversationActive);
            }

            let unfinished = conversation
                .latest_turn()
                .is_some_and(|turn| !turn.is_completed());
            let mut new_state = SessionState {
                conversation_id: Some(conversation.id.clone()),
                last_step_id: conversation.last_step_id().map(str::to_string),
                turns: conversation.turns,
                error: None,
                ..state.clone()
            };

            if unfinished {
                new_state.is_processing = true;
                new_state.polling = true;
                new_state.poll_epoch = state.poll_epoch + 1;
                let effect = Effect::StartPolling {
                    conversation_id: conversation.id,
                    poll_epoch: new_state.poll_epoch,
                };
                Ok(TransitionResult::new(new_state)
                    .with_effect(effect)
                    .with_effect(Effect::NotifyStateChange))
            } else {
                Ok(TransitionResult::new(new_state).with_effect(Effect::NotifyStateChange))
            }
        }

        // ============================================================
        // Reset
        // ============================================================
        Event::Reset => {
            let new_state = SessionState {
                session_epoch: state.session_epoch + 1,
                poll_epoch: state.poll_epoch,
                ..SessionState::default()
            };
            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::StopPolling)
                .with_effect(Effect::NotifyStateChange))
        }
    }
}

/// Apply an authoritative poll response: replace the turn list, advance the
/// cursor and stop polling once the latest turn is completed.
fn apply_poll(state: &SessionState, conversation: Conversation) -> TransitionResult {
    let step_effects: Vec<Effect> = newly_observed_steps(&state.turns, &conversation.turns)
        .into_iter()
        .map(|(turn_id, steps)| Effect::NotifySteps { turn_id, steps })
        .collect();

    let mut new_state = state.clone();
    if let Some(step_id) = conversation.last_step_id() {
        new_state.last_step_id = Some(step_id.to_string());
    }
    new_state.turns = conversation.turns;

    let completed = new_state.latest_turn().filter(|turn| turn.is_completed()).cloned();
    let mut result = TransitionResult::new(new_state).with_effects(step_effects);

    if let Some(turn) = completed {
        // A forced turn may already be in flight behind the completed one
        result.new_state.is_processing = state.pending_request.is_some();
        result.new_state.polling = false;
        result = result
            .with_effect(Effect::StopPolling)
            .with_effect(Effect::NotifyTurnCompleted { turn });
    }

    result.with_effect(Effect::NotifyStateChange)
}
