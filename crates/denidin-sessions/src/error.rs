use thiserror::Error;

/// Errors raised by `SessionStore`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found for chat {chat_id}")]
    NotFound { chat_id: String },

    #[error("message file missing: {0}")]
    MessageNotFound(String),

    #[error("session directory not found on disk for session {0}")]
    DirMissing(String),

    /// `AppendWithTokenLimit` with a zero `role_limit` — a blocked user's
    /// budget.
    #[error("operation forbidden: role token limit is zero")]
    Forbidden,

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize session state: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
