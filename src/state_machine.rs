//! Conversation coordinator state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions.
//! The runtime executor owns the state and performs the returned effects.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::{Event, RequestKind};
pub use state::{CoordinatorContext, SessionState, SessionStatus, DEFAULT_COOLDOWN};
pub use transition::{failure_message, transition, AdmissionError, CooldownAction, TransitionResult};
