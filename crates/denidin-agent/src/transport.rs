use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use denidin_core::Severity;

/// The kind of content an inbound notification carries. Anything other than `Text` is rejected with a fixed reply — media
/// extraction is an out-of-scope external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    Document,
    Audio,
    Unsupported,
}

/// A parsed, transport-agnostic inbound message.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: String,
    pub chat_id: String,
    pub sender: String,
    pub text: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    pub is_group: bool,
}

/// Errors classifiable into `{rate_limit, timeout, server, client, network}`.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("client error: {0}")]
    Client(String),
    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    pub fn severity(&self) -> Severity {
        match self {
            TransportError::Client(_) => Severity::Permanent,
            _ => Severity::Transient,
        }
    }
}

/// The external messaging transport. `Receive` is driven
/// by the transport itself (push, not polled) so only `Reply` is part of
/// the contract the core depends on.
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<(), TransportError>;
}
