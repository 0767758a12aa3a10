//! Property-based tests for the coordinator state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::*;
use crate::conversation::{Conversation, Step, StepKind, Turn, TurnReceipt, TurnStatus};
use crate::transport::TransportError;
use proptest::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context() -> CoordinatorContext {
    CoordinatorContext::default()
}

fn base_instant() -> Instant {
    Instant::now()
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_status() -> impl Strategy<Value = TurnStatus> {
    prop_oneof![
        Just(TurnStatus::Pending),
        Just(TurnStatus::Processing),
        Just(TurnStatus::Completed),
    ]
}

fn arb_step_kind() -> impl Strategy<Value = StepKind> {
    prop_oneof![
        Just(StepKind::Generation),
        Just(StepKind::SqlQuery),
        Just(StepKind::SqlResult),
        Just(StepKind::ToolUse),
        Just(StepKind::FinalResponse),
        "[a-z_]{1,10}".prop_map(StepKind::Other),
    ]
}

fn arb_step() -> impl Strategy<Value = Step> {
    ("s[0-9]{1,3}", arb_step_kind()).prop_map(|(id, kind)| Step::new(id, kind))
}

fn arb_turn() -> impl Strategy<Value = Turn> {
    (
        "t[0-9]{1,2}",
        "[a-z ]{1,20}",
        arb_status(),
        proptest::collection::vec(arb_step(), 0..4),
    )
        .prop_map(|(id, message, status, steps)| {
            let mut turn = Turn::new(id, message, status);
            turn.steps = steps;
            turn
        })
}

fn arb_turns() -> impl Strategy<Value = Vec<Turn>> {
    proptest::collection::vec(arb_turn(), 0..4)
}

fn arb_conversation_id() -> impl Strategy<Value = String> {
    prop_oneof![Just("c1".to_string()), Just("c2".to_string())]
}

fn arb_transport_error() -> impl Strategy<Value = TransportError> {
    prop_oneof![
        "[a-z ]{1,20}".prop_map(TransportError::network),
        (400u16..600, "[a-z ]{0,20}").prop_map(|(status, body)| TransportError::from_status(status, &body)),
        Just(TransportError::from_status(400, "still processing")),
        Just(TransportError::from_status(409, "use force=true")),
    ]
}

fn arb_request_kind() -> impl Strategy<Value = RequestKind> {
    prop_oneof![Just(RequestKind::StartConversation), Just(RequestKind::AddTurn)]
}

/// Arbitrary session state; `last_request_at` is an offset in seconds before
/// the shared base instant.
fn arb_state() -> impl Strategy<Value = SessionState> {
    (
        proptest::option::of(arb_conversation_id()),
        arb_turns(),
        any::<bool>(),
        proptest::option::of("[a-z ]{1,20}"),
        proptest::option::of(0u64..200),
        proptest::option::of(arb_request_kind()),
        any::<bool>(),
        0u64..3,
        0u64..3,
    )
        .prop_map(
            |(conversation_id, turns, is_processing, error, ago, pending_request, polling, session_epoch, poll_epoch)| {
                let now = base_instant();
                let has_conversation = conversation_id.is_some();
                SessionState {
                    conversation_id,
                    last_step_id: turns.last().and_then(Turn::last_step).map(|s| s.step_id.clone()),
                    turns,
                    is_processing: is_processing || pending_request.is_some(),
                    error,
                    last_request_at: ago.map(|secs| now.checked_sub(Duration::from_secs(secs)).unwrap_or(now)),
                    pending_request,
                    polling: polling && has_conversation,
                    session_epoch,
                    poll_epoch,
                }
            },
        )
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        ("[a-z/]{1,10}", "[a-z ]{1,20}", 0u64..120).prop_map(|(context_path, prompt, secs)| {
            Event::StartRequested {
                context_path,
                prompt,
                at: base_instant() + Duration::from_secs(secs),
            }
        }),
        ("[a-z ]{1,20}", any::<bool>(), 0u64..120).prop_map(|(prompt, force, secs)| {
            Event::AddTurnRequested {
                prompt,
                force,
                at: base_instant() + Duration::from_secs(secs),
            }
        }),
        (arb_request_kind(), 0u64..3, arb_conversation_id()).prop_map(|(request, session_epoch, id)| {
            Event::TurnAccepted {
                request,
                session_epoch,
                receipt: TurnReceipt {
                    conversation_id: id,
                    turn_id: "t1".to_string(),
                    created_at: None,
                },
            }
        }),
        (arb_request_kind(), 0u64..3, arb_transport_error()).prop_map(|(request, session_epoch, error)| {
            Event::RequestFailed {
                request,
                session_epoch,
                error,
            }
        }),
        (0u64..4, arb_conversation_id(), arb_turns()).prop_map(|(poll_epoch, id, turns)| {
            Event::PollSucceeded {
                poll_epoch,
                conversation: Conversation {
                    id,
                    name: None,
                    started_at: None,
                    turns,
                },
            }
        }),
        (0u64..4, arb_transport_error()).prop_map(|(poll_epoch, error)| Event::PollFailed { poll_epoch, error }),
        Just(Event::Reset),
    ]
}

// ============================================================================
// State Validity Checkers
// ============================================================================

fn is_valid_state(state: &SessionState) -> bool {
    // A submission in flight always counts as processing
    let pending_ok = state.pending_request.is_none() || state.is_processing;
    // Polling needs a conversation to poll
    let polling_ok = !state.polling || state.conversation_id.is_some();
    // The cursor always points at the last step of the last turn, if any
    let cursor_ok = match state.latest_turn().and_then(Turn::last_step) {
        Some(step) => state.last_step_id.as_deref() == Some(step.step_id.as_str()),
        None => true,
    };
    pending_ok && polling_ok && cursor_ok
}

fn effects_are_valid(old: &SessionState, effects: &[Effect], new_state: &SessionState) -> bool {
    let requests = effects.iter().filter(|e| e.is_request()).count();
    // At most one request per transition, and never while one is outstanding
    if requests > 1 || (requests == 1 && old.pending_request.is_some()) {
        return false;
    }
    // StartPolling only when the new state is polling
    let starts_polling = effects
        .iter()
        .any(|e| matches!(e, Effect::StartPolling { .. }));
    !starts_polling || new_state.polling
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Invariant 1: Valid state after any sequence of events
    #[test]
    fn prop_transitions_preserve_validity(events in proptest::collection::vec(arb_event(), 0..25)) {
        let mut state = SessionState::default();
        let ctx = test_context();

        for event in events {
            match transition(&state, &ctx, event) {
                Ok(result) => {
                    prop_assert!(
                        effects_are_valid(&state, &result.effects, &result.new_state),
                        "Invalid effects {:?} from {:?}",
                        result.effects,
                        state
                    );
                    state = result.new_state;
                    prop_assert!(is_valid_state(&state), "Invalid state: {:?}", state);
                }
                Err(_) => { /* Local rejection is OK */ }
            }
        }
    }

    // Invariant 2: requests inside the cooldown are rejected without I/O
    #[test]
    fn prop_cooldown_rejects_unforced_requests(
        state in arb_state(),
        elapsed in 0u64..60,
        prompt in "[a-z ]{1,20}",
        start in any::<bool>(),
    ) {
        let last = base_instant();
        let state = SessionState { last_request_at: Some(last), pending_request: None, ..state };
        let at = last + Duration::from_secs(elapsed);
        let event = if start {
            Event::StartRequested { context_path: "/promo".to_string(), prompt, at }
        } else {
            Event::AddTurnRequested { prompt, force: false, at }
        };

        let result = transition(&state, &test_context(), event);
        prop_assert!(result.is_err(), "Expected rejection, got {:?}", result);
    }

    // Invariant 3: cooldown message names ceil(60 - elapsed)
    #[test]
    fn prop_cooldown_names_remaining_seconds(elapsed_ms in 0u64..60_000) {
        let last = base_instant();
        let state = SessionState { last_request_at: Some(last), ..SessionState::default() };
        let event = Event::StartRequested {
            context_path: "/promo".to_string(),
            prompt: "p".to_string(),
            at: last + Duration::from_millis(elapsed_ms),
        };
        let expected = (60_000 - elapsed_ms).div_ceil(1000);
        let err = transition(&state, &test_context(), event).unwrap_err();
        let cooldown = AdmissionError::Cooldown {
            remaining_secs: expected,
            action: CooldownAction::StartConversation,
        };
        prop_assert_eq!(err, cooldown);
    }

    // Invariant 4: force bypasses both the still-processing guard and the cooldown
    #[test]
    fn prop_force_bypasses_local_guards(
        turns in proptest::collection::vec(arb_turn(), 1..4),
        elapsed in 0u64..60,
        prompt in "[a-z ]{1,20}",
    ) {
        let last = base_instant();
        let state = SessionState {
            conversation_id: Some("c1".to_string()),
            turns,
            is_processing: true,
            last_request_at: Some(last),
            ..SessionState::default()
        };
        let event = Event::AddTurnRequested {
            prompt: prompt.clone(),
            force: true,
            at: last + Duration::from_secs(elapsed),
        };

        let result = transition(&state, &test_context(), event);
        prop_assert!(result.is_ok(), "Force should be admitted: {:?}", result);
        let effects = result.unwrap().effects;
        let expected = Effect::AddConversationTurn {
            session_epoch: 0,
            conversation_id: "c1".to_string(),
            prompt,
            force: true,
        };
        prop_assert!(effects.contains(&expected));
    }

    // Invariant 5: an unfinished latest turn blocks unforced add-turn
    #[test]
    fn prop_unfinished_turn_blocks_add_turn(turn in arb_turn(), later in 60u64..600) {
        prop_assume!(!turn.is_completed());
        let last = base_instant();
        let state = SessionState {
            conversation_id: Some("c1".to_string()),
            turns: vec![turn],
            last_request_at: Some(last),
            ..SessionState::default()
        };
        let event = Event::AddTurnRequested {
            prompt: "next".to_string(),
            force: false,
            at: last + Duration::from_secs(later),
        };
        prop_assert_eq!(
            transition(&state, &test_context(), event).unwrap_err(),
            AdmissionError::PreviousTurnProcessing
        );
    }

    // Invariant 6: can_send_message iff status is idle or completed
    #[test]
    fn prop_can_send_matches_status(state in arb_state()) {
        let expected = matches!(state.status(), SessionStatus::Idle | SessionStatus::Completed);
        prop_assert_eq!(state.can_send_message(), expected);
    }

    // Invariant 7: poll failures never stop polling
    #[test]
    fn prop_poll_failure_keeps_polling(state in arb_state(), errors in proptest::collection::vec(arb_transport_error(), 1..10)) {
        let mut state = SessionState {
            conversation_id: Some("c1".to_string()),
            polling: true,
            ..state
        };
        for error in errors {
            let result = transition(&state, &test_context(), Event::PollFailed { poll_epoch: state.poll_epoch, error }).unwrap();
            prop_assert!(!result.effects.contains(&Effect::StopPolling));
            state = result.new_state;
            prop_assert!(state.polling);
            prop_assert!(state.error.is_some());
        }
    }

    // Invariant 8: polling stops exactly when the latest polled turn is completed
    #[test]
    fn prop_poll_stops_only_on_completed_turn(turns in proptest::collection::vec(arb_turn(), 1..4)) {
        let state = SessionState {
            conversation_id: Some("c1".to_string()),
            is_processing: true,
            polling: true,
            poll_epoch: 1,
            ..SessionState::default()
        };
        let completed = turns.last().is_some_and(Turn::is_completed);
        let event = Event::PollSucceeded {
            poll_epoch: 1,
            conversation: Conversation { id: "c1".to_string(), name: None, started_at: None, turns },
        };
        let result = transition(&state, &test_context(), event).unwrap();
        prop_assert_eq!(result.effects.contains(&Effect::StopPolling), completed);
        prop_assert_eq!(result.new_state.polling, !completed);
        prop_assert_eq!(result.new_state.can_send_message(), completed);
    }

    // Invariant 9: reset always returns to idle
    #[test]
    fn prop_reset_always_idle(state in arb_state()) {
        let result = transition(&state, &test_context(), Event::Reset).unwrap();
        let new_state = result.new_state;
        prop_assert_eq!(new_state.status(), SessionStatus::Idle);
        prop_assert!(new_state.turns.is_empty());
        prop_assert!(new_state.error.is_none());
        prop_assert!(!new_state.is_processing);
        prop_assert!(new_state.last_request_at.is_none());
        prop_assert!(new_state.last_step_id.is_none());
        prop_assert!(!new_state.polling);
        prop_assert!(new_state.session_epoch > state.session_epoch);
        prop_assert!(result.effects.contains(&Effect::StopPolling));
    }

    // Invariant 10: results from a previous session never touch the state
    #[test]
    fn prop_stale_request_results_ignored(
        state in arb_state(),
        request in arb_request_kind(),
        error in arb_transport_error(),
        accepted in any::<bool>(),
    ) {
        let stale_epoch = state.session_epoch + 1;
        let event = if accepted {
            Event::TurnAccepted {
                request,
                session_epoch: stale_epoch,
                receipt: TurnReceipt { conversation_id: "c9".to_string(), turn_id: "t9".to_string(), created_at: None },
            }
        } else {
            Event::RequestFailed { request, session_epoch: stale_epoch, error }
        };
        let result = transition(&state, &test_context(), event).unwrap();
        prop_assert_eq!(result.new_state, state);
        prop_assert!(result.effects.is_empty());
    }
}
