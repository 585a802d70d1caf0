use thiserror::Error;

/// Raised only when the caller supplies a structurally invalid identity,
/// never for an unknown phone (an unknown phone just resolves to the
/// `Client` default role).
#[derive(Debug, Error)]
pub enum UserError {
    #[error("phone number cannot be empty")]
    EmptyPhone,
}

pub type Result<T> = std::result::Result<T, UserError>;
