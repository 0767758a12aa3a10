//! Wire types for the conversation API and their translation into the
//! conversation data model

use crate::conversation::{Conversation, Step, StepKind, Turn, TurnReceipt, TurnStatus};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub(crate) struct CreateConversationBody<'a> {
    pub context_path: &'a str,
    pub prompt: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct AddTurnBody<'a> {
    pub prompt: &'a str,
}

/// Identifiers arrive as strings or integers depending on the backend table
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireId {
    Text(String),
    Number(i64),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            WireId::Text(s) => s,
            WireId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireReceipt {
    conversation_id: WireId,
    turn_id: WireId,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireConversation {
    conversation_id: WireId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    started_at: Option<String>,
    #[serde(default)]
    turns: Vec<WireTurn>,
}

#[derive(Debug, Deserialize)]
struct WireTurn {
    turn_id: WireId,
    #[serde(default)]
    user_message: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    assistant_response: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    llm_steps: Vec<WireStep>,
}

#[derive(Debug, Deserialize)]
struct WireStep {
    step_id: WireId,
    #[serde(default)]
    step_type: Option<String>,
    #[serde(default)]
    input: Option<Value>,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    created_at: Option<String>,
}

impl From<WireReceipt> for TurnReceipt {
    fn from(wire: WireReceipt) -> Self {
        TurnReceipt {
            conversation_id: wire.conversation_id.into_string(),
            turn_id: wire.turn_id.into_string(),
            created_at: parse_timestamp(wire.created_at.as_deref()),
        }
    }
}

impl From<WireConversation> for Conversation {
    fn from(wire: WireConversation) -> Self {
        Conversation {
            id: wire.conversation_id.into_string(),
            name: wire.name,
            started_at: parse_timestamp(wire.started_at.as_deref()),
            turns: wire.turns.into_iter().map(Turn::from).collect(),
        }
    }
}

impl From<WireTurn> for Turn {
    fn from(wire: WireTurn) -> Self {
        let status = wire
            .status
            .as_deref()
            .map_or(TurnStatus::Processing, TurnStatus::from_wire);
        Turn {
            turn_id: wire.turn_id.into_string(),
            user_message: wire.user_message.unwrap_or_default(),
            status,
            // Only a completed turn carries a final response
            assistant_response: wire.assistant_response.filter(|_| status.is_terminal()),
            created_at: parse_timestamp(wire.created_at.as_deref()),
            steps: wire.llm_steps.into_iter().map(Step::from).collect(),
        }
    }
}

impl From<WireStep> for Step {
    fn from(wire: WireStep) -> Self {
        Step {
            step_id: wire.step_id.into_string(),
            kind: wire
                .step_type
                .as_deref()
                .map_or_else(|| StepKind::Other(String::new()), StepKind::from_wire),
            input: wire.input.filter(|v| !v.is_null()),
            output: wire.output.and_then(value_to_text),
            created_at: parse_timestamp(wire.created_at.as_deref()),
        }
    }
}

fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Parse RFC 3339, falling back to a naive timestamp taken as UTC
pub(crate) fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
