//! Conversation data model
//!
//! Records exchanged with the promotion agent backend. A conversation owns an
//! ordered list of turns; each turn owns the ordered, append-only list of
//! steps the agent took while producing its response.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Server-authoritative status of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnStatus {
    #[default]
    Pending,
    Processing,
    Completed,
}

impl TurnStatus {
    /// Parse a wire status. Unknown values are treated as still processing so
    /// that an unfamiliar status can never end a poll loop early.
    pub fn from_wire(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "pending" => TurnStatus::Pending,
            "completed" => TurnStatus::Completed,
            _ => TurnStatus::Processing,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TurnStatus::Pending => "pending",
            TurnStatus::Processing => "processing",
            TurnStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TurnStatus::Completed)
    }
}

/// Kind of work an agent step represents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    Generation,
    SqlQuery,
    SqlResult,
    ToolUse,
    FinalResponse,
    /// Any step type the client does not recognise
    Other(String),
}

impl StepKind {
    pub fn from_wire(step_type: &str) -> Self {
        match step_type {
            "generation" => StepKind::Generation,
            "sql_query" => StepKind::SqlQuery,
            "sql_result" => StepKind::SqlResult,
            "tool_use" => StepKind::ToolUse,
            "final_response" => StepKind::FinalResponse,
            other => StepKind::Other(other.to_string()),
        }
    }

    /// Short label for progress display
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Generation => "Thinking",
            StepKind::SqlQuery => "Querying Database",
            StepKind::SqlResult => "Analyzing Results",
            StepKind::ToolUse => "Using Tool",
            StepKind::FinalResponse => "Responding",
            StepKind::Other(_) => "Processing",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StepKind::Generation => "The agent is processing your request...",
            StepKind::SqlQuery => "Fetching data...",
            StepKind::SqlResult => "Processing query results...",
            StepKind::ToolUse => "Executing action...",
            StepKind::FinalResponse => "Preparing response...",
            StepKind::Other(_) => "Working...",
        }
    }
}

/// One intermediate unit of agent work within a turn
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub step_id: String,
    pub kind: StepKind,
    pub input: Option<Value>,
    pub output: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(step_id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            step_id: step_id.into(),
            kind,
            input: None,
            output: None,
            created_at: None,
        }
    }

    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// One user prompt and the agent's (eventual) response
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub turn_id: String,
    pub user_message: String,
    pub status: TurnStatus,
    /// Populated once the turn is completed
    pub assistant_response: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub steps: Vec<Step>,
}

impl Turn {
    pub fn new(turn_id: impl Into<String>, user_message: impl Into<String>, status: TurnStatus) -> Self {
        Self {
            turn_id: turn_id.into(),
            user_message: user_message.into(),
            status,
            assistant_response: None,
            created_at: None,
            steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.assistant_response = Some(response.into());
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }
}

/// A conversation as reported by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub turns: Vec<Turn>,
}

impl Conversation {
    pub fn latest_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Id of the last step of the last turn, used as the polling cursor
    pub fn last_step_id(&self) -> Option<&str> {
        self.latest_turn()
            .and_then(Turn::last_step)
            .map(|step| step.step_id.as_str())
    }
}

/// Acknowledgement returned when the backend accepts a new turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReceipt {
    pub conversation_id: String,
    pub turn_id: String,
    pub created_at: Option<DateTime<Utc>>,
}
