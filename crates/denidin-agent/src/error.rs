use thiserror::Error;

/// Errors raised by `MessagePipeline::handle`. Every variant
/// here is caught by the pipeline's own outer handler — none of them ever
/// propagate out of `handle`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("user is blocked")]
    Forbidden,

    #[error("session store error: {0}")]
    Session(#[from] denidin_sessions::SessionError),

    #[error("user directory error: {0}")]
    User(#[from] denidin_users::UserError),

    #[error("memory store error: {0}")]
    Memory(#[from] denidin_memory::MemoryError),

    #[error("provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
