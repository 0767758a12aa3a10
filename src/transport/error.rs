//! Transport error types

use thiserror::Error;

/// Transport error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    /// HTTP status, when the server answered at all
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotFound, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Rejected, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Decode, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Unknown, message)
    }

    /// Classify a non-success HTTP response
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = body.trim();
        let message = if body.is_empty() {
            format!("API Error: {status}")
        } else {
            format!("API Error: {status}: {body}")
        };
        let kind = match status {
            404 => TransportErrorKind::NotFound,
            400 | 409 | 422 => TransportErrorKind::Rejected,
            401 | 403 => TransportErrorKind::Auth,
            500..=599 => TransportErrorKind::ServerError,
            _ => TransportErrorKind::Unknown,
        };
        Self::new(kind, message).with_status(status)
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection failures and timeouts
    Network,
    /// 404, e.g. no active conversation
    NotFound,
    /// 400-class admission rejection (previous turn still processing)
    Rejected,
    /// 401, 403
    Auth,
    /// 5xx
    ServerError,
    /// Response body did not match the expected shape
    Decode,
    Unknown,
}

impl TransportErrorKind {
    /// Whether waiting and asking again may succeed
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::ServerError)
    }
}
