use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use denidin_core::Severity;
use denidin_sessions::MessageRole;

/// One prior conversational turn fed to the LLM.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    Other,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub total: u32,
    pub prompt: u32,
    pub completion: u32,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
    pub finish_reason: FinishReason,
}

/// Errors classifiable into `{rate_limit, timeout, server, client}`.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("provider server error: {0}")]
    Server(String),
    #[error("provider client error: {0}")]
    Client(String),
}

impl ProviderError {
    /// `Transient` is eligible for a single retry; `Permanent` is not.
    pub fn severity(&self) -> Severity {
        match self {
            ProviderError::RateLimit(_) | ProviderError::Timeout(_) | ProviderError::Server(_) => {
                Severity::Transient
            }
            ProviderError::Client(_) => Severity::Permanent,
        }
    }
}

/// The external LLM collaborator. Production network clients for any
/// concrete model provider are out of scope — only this trait and a
/// deterministic mock are shipped.
#[async_trait]
pub trait Completer: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn complete(
        &self,
        system: &str,
        history: &[Turn],
        prompt: &str,
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Completion, ProviderError>;
}

/// Deterministic in-process mock used by tests and by `denidin-gateway`'s
/// default wiring when no real provider is configured.
///
/// Canned replies are keyed by the exact `prompt` text; an unmapped prompt
/// gets a fixed default reply rather than panicking, so pipeline tests that
/// don't care about the LLM's exact wording still pass.
pub struct MockCompleter {
    replies: Mutex<HashMap<String, String>>,
    default_reply: String,
}

impl MockCompleter {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            default_reply: "ok".to_string(),
        }
    }

    pub fn with_reply(self, prompt: impl Into<String>, reply: impl Into<String>) -> Self {
        self.replies.lock().unwrap().insert(prompt.into(), reply.into());
        self
    }
}

impl Default for MockCompleter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Completer for MockCompleter {
    async fn complete(
        &self,
        _system: &str,
        _history: &[Turn],
        prompt: &str,
        _model: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<Completion, ProviderError> {
        let text = self
            .replies
            .lock()
            .unwrap()
            .get(prompt)
            .cloned()
            .unwrap_or_else(|| self.default_reply.clone());
        Ok(Completion {
            usage: Usage {
                total: text.len() as u32,
                prompt: prompt.len() as u32,
                completion: text.len() as u32,
            },
            text,
            finish_reason: FinishReason::Stop,
        })
    }
}

/// A mock that always fails with a given error — used to exercise the
/// summarisation-fallback and retry-exhaustion paths.
pub struct FailingCompleter(pub ProviderError);

#[async_trait]
impl Completer for FailingCompleter {
    async fn complete(
        &self,
        _system: &str,
        _history: &[Turn],
        _prompt: &str,
        _model: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<Completion, ProviderError> {
        Err(self.0.clone())
    }
}
