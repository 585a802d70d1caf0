use thiserror::Error;

/// Vector-store init and embedding failures, plus storage errors as they
/// apply to the long-term memory layer.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// `ERR-MEMORY-001`. The caller disables the memory path and continues;
    /// foreground requests still succeed without long-term recall.
    #[error("ERR-MEMORY-001: vector store initialisation failed: {0}")]
    Init(String),

    /// `ERR-MEMORY-002`. In `Remember` during summarisation this falls
    /// through to the raw-transcript fallback; in `Recall` from the
    /// foreground path the caller proceeds with no recalled memories.
    #[error("ERR-MEMORY-002: embedding failed: {0}")]
    Embedding(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
