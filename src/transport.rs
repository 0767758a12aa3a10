//! Conversation transport
//!
//! Stateless request/response mapping to the backend conversation API.
//! No retries happen here; retry policy belongs to the coordinator.

mod error;
mod http;
pub(crate) mod wire;

pub use error::{TransportError, TransportErrorKind};
pub use http::{AuthMode, HttpTransport};

use crate::conversation::{Conversation, TurnReceipt};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Client for the conversation endpoints
#[async_trait]
pub trait ConversationTransport: Send + Sync {
    /// `POST /conversation`. Success means the turn was accepted, not finished.
    async fn create_conversation(
        &self,
        context_path: &str,
        prompt: &str,
    ) -> Result<TurnReceipt, TransportError>;

    /// `GET /conversation`, optionally only what follows `last_step_id_seen`.
    /// Fails with `NotFound` when no conversation is active.
    async fn fetch_active_conversation(
        &self,
        last_step_id_seen: Option<&str>,
    ) -> Result<Conversation, TransportError>;

    /// `POST /conversation/{id}/turn`. The server rejects the request while the
    /// previous turn is unfinished unless `force` is set.
    async fn add_conversation_turn(
        &self,
        conversation_id: &str,
        prompt: &str,
        force: bool,
    ) -> Result<TurnReceipt, TransportError>;

    /// `GET /conversation/{id}`
    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Conversation, TransportError>;
}

#[async_trait]
impl<T: ConversationTransport + ?Sized> ConversationTransport for Arc<T> {
    async fn create_conversation(
        &self,
        context_path: &str,
        prompt: &str,
    ) -> Result<TurnReceipt, TransportError> {
        (**self).create_conversation(context_path, prompt).await
    }

    async fn fetch_active_conversation(
        &self,
        last_step_id_seen: Option<&str>,
    ) -> Result<Conversation, TransportError> {
        (**self).fetch_active_conversation(last_step_id_seen).await
    }

    async fn add_conversation_turn(
        &self,
        conversation_id: &str,
        prompt: &str,
        force: bool,
    ) -> Result<TurnReceipt, TransportError> {
        (**self).add_conversation_turn(conversation_id, prompt, force).await
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Conversation, TransportError> {
        (**self).fetch_conversation(conversation_id).await
    }
}

/// Logging wrapper for transports
pub struct LoggingTransport<T> {
    inner: T,
}

impl<T: ConversationTransport> LoggingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

fn log_outcome<V>(operation: &'static str, started: Instant, result: &Result<V, TransportError>) {
    let duration_ms = started.elapsed().as_millis();
    match result {
        Ok(_) => {
            tracing::debug!(operation, duration_ms = %duration_ms, "Conversation request completed");
        }
        // Expected while no conversation is active
        Err(e) if e.kind == TransportErrorKind::NotFound => {
            tracing::debug!(operation, duration_ms = %duration_ms, error = %e, "Conversation not found");
        }
        Err(e) => {
            tracing::warn!(
                operation,
                duration_ms = %duration_ms,
                status = ?e.status,
                error = %e.message,
                transient = e.kind.is_transient(),
                "Conversation request failed"
            );
        }
    }
}

#[async_trait]
impl<T: ConversationTransport> ConversationTransport for LoggingTransport<T> {
    async fn create_conversation(
        &self,
        context_path: &str,
        prompt: &str,
    ) -> Result<TurnReceipt, TransportError> {
        let started = Instant::now();
        let result = self.inner.create_conversation(context_path, prompt).await;
        log_outcome("create_conversation", started, &result);
        result
    }

    async fn fetch_active_conversation(
        &self,
        last_step_id_seen: Option<&str>,
    ) -> Result<Conversation, TransportError> {
        let started = Instant::now();
        let result = self.inner.fetch_active_conversation(last_step_id_seen).await;
        log_outcome("fetch_active_conversation", started, &result);
        result
    }

    async fn add_conversation_turn(
        &self,
        conversation_id: &str,
        prompt: &str,
        force: bool,
    ) -> Result<TurnReceipt, TransportError> {
        let started = Instant::now();
        let result = self
            .inner
            .add_conversation_turn(conversation_id, prompt, force)
            .await;
        log_outcome("add_conversation_turn", started, &result);
        result
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Conversation, TransportError> {
        let started = Instant::now();
        let result = self.inner.fetch_conversation(conversation_id).await;
        log_outcome("fetch_conversation", started, &result);
        result
    }
}
