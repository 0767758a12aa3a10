//! HTTP implementation of the conversation transport

use super::wire::{AddTurnBody, CreateConversationBody, WireConversation, WireReceipt};
use super::{ConversationTransport, TransportError};
use crate::conversation::{Conversation, TurnReceipt};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// How requests authenticate against the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// An auth proxy in front of the backend adds credentials
    Proxy,
    /// Direct calls with HTTP Basic credentials
    Basic { username: String, password: String },
}

/// reqwest-backed conversation transport
pub struct HttpTransport {
    client: Client,
    base_url: String,
    auth: AuthMode,
}

impl HttpTransport {
    pub fn new(base_url: &str, auth: AuthMode, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            AuthMode::Proxy => request,
            AuthMode::Basic { username, password } => request
                .basic_auth(username, Some(password))
                .header("ngrok-skip-browser-warning", "true"),
        }
    }

    async fn send<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, TransportError> {
        let response = self
            .authorize(request)
            .header("content-type", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    TransportError::network(format!("Connection failed: {e}"))
                } else {
                    TransportError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(TransportError::from_status(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            TransportError::decode(format!("Failed to parse response: {e} - body: {body}"))
                .with_status(status.as_u16())
        })
    }
}

#[async_trait]
impl ConversationTransport for HttpTransport {
    async fn create_conversation(
        &self,
        context_path: &str,
        prompt: &str,
    ) -> Result<TurnReceipt, TransportError> {
        let request = self
            .client
            .post(self.url("/conversation"))
            .json(&CreateConversationBody { context_path, prompt });
        let receipt: WireReceipt = self.send(request).await?;
        Ok(receipt.into())
    }

    async fn fetch_active_conversation(
        &self,
        last_step_id_seen: Option<&str>,
    ) -> Result<Conversation, TransportError> {
        let mut request = self.client.get(self.url("/conversation"));
        if let Some(cursor) = last_step_id_seen {
            request = request.query(&[("last_step_id_seen", cursor)]);
        }
        let conversation: WireConversation = self.send(request).await?;
        Ok(conversation.into())
    }

    async fn add_conversation_turn(
        &self,
        conversation_id: &str,
        prompt: &str,
        force: bool,
    ) -> Result<TurnReceipt, TransportError> {
        let mut request = self
            .client
            .post(self.url(&format!("/conversation/{conversation_id}/turn")))
            .json(&AddTurnBody { prompt });
        if force {
            request = request.query(&[("force", "true")]);
        }
        let receipt: WireReceipt = self.send(request).await?;
        Ok(receipt.into())
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Conversation, TransportError> {
        let request = self
            .client
            .get(self.url(&format!("/conversation/{conversation_id}")));
        let conversation: WireConversation = self.send(request).await?;
        Ok(conversation.into())
    }
}
