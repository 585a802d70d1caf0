use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use denidin_core::ids::{MessageId, SessionId};

/// A single conversational turn. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: MessageRole,
    pub content: String,
    pub sender: String,
    pub recipient: String,
    pub created_at: DateTime<Utc>,
    /// Equal to the owning session's `message_counter` at insertion time.
    pub sequence: u64,
    pub tokens: u64,
    pub attachment: Option<String>,
}

/// Conversation state for one chat.
///
/// `storage_path` distinguishes active sessions (`None`, implied location
/// under the active root) from archived ones (`Some(relative path)` under
/// `<root>/expired/<date>/<session_id>/`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub chat_id: String,
    pub message_ids: Vec<MessageId>,
    pub message_counter: u64,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub total_tokens: u64,
    pub transferred_to_longterm: bool,
    pub storage_path: Option<String>,
}

impl Session {
    pub fn new(chat_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            chat_id: chat_id.into(),
            message_ids: Vec::new(),
            message_counter: 0,
            created_at: now,
            last_active: now,
            total_tokens: 0,
            transferred_to_longterm: false,
            storage_path: None,
        }
    }

    /// Not-expired at `<` the timeout, expired at `>=`.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout_hours: u32) -> bool {
        now - self.last_active >= chrono::Duration::hours(timeout_hours as i64)
    }
}
