use thiserror::Error;

/// Startup/configuration failures — fatal, never raised at runtime.
///
/// Validation or file-load failures exit the process with a dedicated
/// configuration-error code (2), distinct from a runtime-fatal exit (1).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Shared classification for provider-facing errors (the LLM completer and
/// the messaging transport), used by `denidin-agent`'s retry policy.
///
/// `Transient` (rate-limit, timeout, 5xx) is eligible for one retry;
/// `Permanent` (4xx) is never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Transient,
    Permanent,
}

impl Severity {
    /// Classify an HTTP-style status code.
    pub fn from_status(status: u16) -> Self {
        if (500..600).contains(&status) {
            Severity::Transient
        } else {
            Severity::Permanent
        }
    }
}
