use thiserror::Error;

/// Errors produced while parsing or authenticating an inbound webhook
/// delivery.
#[derive(Debug, Error)]
pub enum WhatsAppError {
    #[error("malformed webhook payload: {0}")]
    Malformed(String),

    #[error("webhook signature rejected: {0}")]
    Unauthorized(String),
}

pub type Result<T> = std::result::Result<T, WhatsAppError>;
