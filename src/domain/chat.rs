//! Chat transcript types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker of a transcript turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// How an assistant answer is displayed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Rendered {
    Text { text: String },
    /// A JSON list of records, one row per record
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

/// One entry of the append-only transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered: Option<Rendered>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
    /// Set on the assistant turn that reports a failed invocation
    #[serde(default)]
    pub is_error: bool,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            rendered: None,
            trace: Vec::new(),
            is_error: false,
            at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, rendered: Rendered, trace: Vec<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            rendered: Some(rendered),
            trace,
            is_error: false,
            at: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            role: Role::Assistant,
            rendered: Some(Rendered::Text {
                text: message.clone(),
            }),
            content: message,
            trace: Vec::new(),
            is_error: true,
            at: Utc::now(),
        }
    }
}

/// Per-session turn state:
/// `Idle → Sending → RenderingResponse → AwaitingInput → Sending → ...`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, no question asked yet
    Idle,
    /// At least one turn finished; waiting for the next question
    AwaitingInput,
    Sending,
    RenderingResponse,
}

impl SessionState {
    /// A new question is accepted only while nothing is in flight
    pub fn accepts_input(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::AwaitingInput)
    }
}
