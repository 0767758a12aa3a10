//! Promotion agent client
//!
//! Coordinates conversation turns with the promotion agent backend: starts
//! conversations, adds turns under a client-side cooldown, and polls the
//! active conversation until the latest turn completes.

pub mod config;
pub mod conversation;
pub mod runtime;
pub mod state_machine;
pub mod transport;
