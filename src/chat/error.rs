use thiserror::Error;

/// Errors surfaced by a chat turn
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("question must not be empty")]
    EmptyQuestion,

    /// A previous question of this session is still in flight
    #[error("session {0} is busy")]
    Busy(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// No agent alias is deployed or configured
    #[error("the assistant is not deployed yet")]
    NotConfigured,

    #[error("the assistant could not answer: {0}")]
    Invocation(String),

    #[error("the assistant returned an unreadable answer: {0}")]
    MalformedResponse(String),
}
