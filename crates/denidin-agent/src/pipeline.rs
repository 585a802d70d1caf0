use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use denidin_core::Severity;
use denidin_sessions::{MessageRole, SessionStore};
use denidin_users::UserDirectory;

use crate::error::{PipelineError, Result};
use crate::history::HistoryAssembler;
use crate::provider::{Completer, Turn};
use crate::transport::{IncomingMessage, MessageKind, MessagingTransport};

const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Fixed, non-configurable replies for paths that never reach the LLM.
pub struct FixedReplies {
    pub unsupported_kind: String,
    pub blocked_user: Option<String>,
    pub fallback: String,
}

impl Default for FixedReplies {
    fn default() -> Self {
        Self {
            unsupported_kind: "Sorry, I can only read text messages right now.".to_string(),
            blocked_user: Some("You don't have access to this assistant.".to_string()),
            fallback: "Something went wrong on my end — please try again in a moment.".to_string(),
        }
    }
}

/// Orchestrates inbound message → permission check → history assembly →
/// LLM → persistence → reply as a single synchronous per-message entry
/// point, with its own retry/truncation/RBAC rules.
pub struct MessagePipeline {
    users: Arc<UserDirectory>,
    sessions: Arc<SessionStore>,
    history: Arc<HistoryAssembler>,
    completer: Arc<dyn Completer>,
    transport: Arc<dyn MessagingTransport>,
    replies: FixedReplies,
    assistant_name: String,
    max_message_chars: usize,
}

impl MessagePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<UserDirectory>,
        sessions: Arc<SessionStore>,
        history: Arc<HistoryAssembler>,
        completer: Arc<dyn Completer>,
        transport: Arc<dyn MessagingTransport>,
        replies: FixedReplies,
        assistant_name: impl Into<String>,
        max_message_chars: usize,
    ) -> Self {
        Self {
            users,
            sessions,
            history,
            completer,
            transport,
            replies,
            assistant_name: assistant_name.into(),
            max_message_chars,
        }
    }

    /// `Handle(notification)`. Never propagates an error to
    /// the caller — every failure path is caught here and answered with the
    /// fixed fallback reply so the process never dies from a bad message.
    #[instrument(skip(self, message), fields(chat_id = %message.chat_id, message_id = %message.id))]
    pub async fn handle(&self, message: IncomingMessage) {
        match self.handle_inner(&message).await {
            Ok(()) => {}
            Err(e) => {
                error!("pipeline failed for message {}: {e:?}", message.id);
                if let Err(send_err) = self.transport.reply(&message, &self.replies.fallback).await {
                    warn!("failed to deliver fallback reply for message {}: {send_err}", message.id);
                }
            }
        }
    }

    async fn handle_inner(&self, message: &IncomingMessage) -> Result<()> {
        // Step 1: reject unsupported content kinds with a fixed reply.
        if message.kind != MessageKind::Text {
            self.transport.reply(message, &self.replies.unsupported_kind).await?;
            return Ok(());
        }

        // Step 2: in group chats, only respond when mentioned.
        if message.is_group && !mentions_assistant(&message.text, &self.assistant_name) {
            return Ok(());
        }

        // Step 3: permission check. Blocked users never touch persistence
        // or the LLM.
        let user = self.users.get_user(&message.sender)?;
        if user.is_blocked() {
            if let Some(reply) = &self.replies.blocked_user {
                self.transport.reply(message, reply).await?;
            }
            return Ok(());
        }

        // Step 4: assemble history + recalled memories under budget.
        let input = self.history.compose(&user, &message.chat_id, &message.text).await;

        // Step 5: call the LLM, retrying once on a transient error class.
        let history: Vec<Turn> = input
            .history
            .iter()
            .map(|(role, content)| Turn { role: role.clone(), content: content.clone() })
            .collect();
        let completion = self
            .complete_with_retry(&input.system, &history, &input.prompt, &input.model, input.max_reply_tokens, input.temperature)
            .await?;

        // Step 6: persist user turn then assistant turn, correctly oriented.
        self.sessions.append_with_token_limit(
            &message.chat_id,
            MessageRole::User,
            &message.text,
            &message.sender,
            "assistant",
            user.token_limit,
            None,
        )?;
        self.sessions.append_with_token_limit(
            &message.chat_id,
            MessageRole::Assistant,
            &completion.text,
            "assistant",
            &message.sender,
            user.token_limit,
            None,
        )?;

        // Step 7: truncate oversized replies.
        let reply_text = truncate_for_transport(&completion.text, self.max_message_chars);

        // Step 8: reply via the transport, retrying once on a transient error.
        self.reply_with_retry(message, &reply_text).await?;

        info!("handled message {} for chat {}", message.id, message.chat_id);
        Ok(())
    }

    async fn complete_with_retry(
        &self,
        system: &str,
        history: &[Turn],
        prompt: &str,
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<crate::provider::Completion> {
        match self.completer.complete(system, history, prompt, model, max_tokens, temperature).await {
            Ok(completion) => Ok(completion),
            Err(e) if e.severity() == Severity::Transient => {
                warn!("transient provider error, retrying once: {e}");
                tokio::time::sleep(RETRY_BACKOFF).await;
                Ok(self.completer.complete(system, history, prompt, model, max_tokens, temperature).await?)
            }
            Err(e) => Err(PipelineError::from(e)),
        }
    }

    async fn reply_with_retry(&self, message: &IncomingMessage, text: &str) -> Result<()> {
        match self.transport.reply(message, text).await {
            Ok(()) => Ok(()),
            Err(e) if e.severity() == Severity::Transient => {
                warn!("transient transport error, retrying once: {e}");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.transport.reply(message, text).await?;
                Ok(())
            }
            Err(e) => Err(PipelineError::from(e)),
        }
    }
}

fn mentions_assistant(text: &str, assistant_name: &str) -> bool {
    if assistant_name.is_empty() {
        return false;
    }
    text.to_lowercase().contains(&assistant_name.to_lowercase())
}

/// Truncates to `limit` characters minus three, appending an ellipsis.
/// Operates on chars, not bytes, so multi-byte UTF-8 text is never split
/// mid-codepoint.
fn truncate_for_transport(text: &str, limit: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(3);
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use denidin_core::clock::SystemClock;
    use denidin_core::config::UserRolesConfig;
    use denidin_memory::{HashEmbedder, MemoryStore};
    use denidin_sessions::SessionStore;
    use chrono::Utc;
    use std::collections::HashMap;

    fn pipeline(
        dir: &tempfile::TempDir,
        completer: Arc<dyn Completer>,
        transport: Arc<dyn MessagingTransport>,
    ) -> MessagePipeline {
        let users = Arc::new(UserDirectory::new(
            &UserRolesConfig {
                admin_phones: vec![],
                blocked_phones: vec!["+000".to_string()],
                godfather_phone: None,
            },
            HashMap::new(),
        ));
        let sessions = Arc::new(
            SessionStore::new(dir.path().join("sessions"), Arc::new(SystemClock), 24).unwrap(),
        );
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let memory = Arc::new(
            MemoryStore::open(conn, Arc::new(HashEmbedder::default()), Arc::new(SystemClock)).unwrap(),
        );
        let constitution_path = dir.path().join("constitution.md");
        std::fs::write(&constitution_path, "Be helpful.").unwrap();
        let history = Arc::new(crate::history::HistoryAssembler::new(
            sessions.clone(),
            memory,
            crate::constitution::ConstitutionCache::new(constitution_path),
            "gpt-4o-mini",
            512,
            0.7,
            5,
            0.2,
        ));
        MessagePipeline::new(
            users,
            sessions,
            history,
            completer,
            transport,
            FixedReplies::default(),
            "deni",
            4000,
        )
    }

    fn message(chat_id: &str, sender: &str, text: &str, is_group: bool) -> IncomingMessage {
        IncomingMessage {
            id: "m1".to_string(),
            chat_id: chat_id.to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
            kind: MessageKind::Text,
            timestamp: Utc::now(),
            is_group,
        }
    }

    struct RecordingTransport {
        sent: std::sync::Mutex<Vec<String>>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self { sent: std::sync::Mutex::new(Vec::new()) }
        }
    }

    #[async_trait::async_trait]
    impl MessagingTransport for RecordingTransport {
        async fn reply(&self, _message: &IncomingMessage, text: &str) -> std::result::Result<(), crate::transport::TransportError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn happy_path_stores_turns_and_replies() {
        let dir = tempfile::tempdir().unwrap();
        let completer: Arc<dyn Completer> = Arc::new(
            crate::provider::MockCompleter::new().with_reply("hello", "hi there"),
        );
        let transport = Arc::new(RecordingTransport::new());
        let pipeline = pipeline(&dir, completer, transport.clone());

        pipeline.handle(message("chat-1", "+123", "hello", false)).await;

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &["hi there".to_string()]);
        let history = pipeline.sessions.history("chat-1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].0, MessageRole::User);
        assert_eq!(history[1].0, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn blocked_user_never_touches_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let completer: Arc<dyn Completer> = Arc::new(crate::provider::MockCompleter::new());
        let transport = Arc::new(RecordingTransport::new());
        let pipeline = pipeline(&dir, completer, transport.clone());

        pipeline.handle(message("chat-1", "+000", "hello", false)).await;

        assert!(pipeline.sessions.history("chat-1").is_err());
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
    }

    #[tokio::test]
    async fn group_message_without_mention_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let completer: Arc<dyn Completer> = Arc::new(crate::provider::MockCompleter::new());
        let transport = Arc::new(RecordingTransport::new());
        let pipeline = pipeline(&dir, completer, transport.clone());

        pipeline.handle(message("chat-1", "+123", "just chatting", true)).await;

        assert!(pipeline.sessions.history("chat-1").is_err());
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_message_with_mention_is_handled() {
        let dir = tempfile::tempdir().unwrap();
        let completer: Arc<dyn Completer> =
            Arc::new(crate::provider::MockCompleter::new().with_reply("hey deni, help", "sure"));
        let transport = Arc::new(RecordingTransport::new());
        let pipeline = pipeline(&dir, completer, transport.clone());

        pipeline.handle(message("chat-1", "+123", "hey deni, help", true)).await;

        assert_eq!(transport.sent.lock().unwrap().as_slice(), &["sure".to_string()]);
    }

    #[tokio::test]
    async fn unsupported_kind_gets_fixed_reply_and_skips_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let completer: Arc<dyn Completer> = Arc::new(crate::provider::MockCompleter::new());
        let transport = Arc::new(RecordingTransport::new());
        let pipeline = pipeline(&dir, completer, transport.clone());
        let mut msg = message("chat-1", "+123", "a photo", false);
        msg.kind = MessageKind::Image;

        pipeline.handle(msg).await;

        assert!(pipeline.sessions.history("chat-1").is_err());
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &["Sorry, I can only read text messages right now.".to_string()]);
    }

    #[tokio::test]
    async fn oversized_reply_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let long_reply = "x".repeat(5000);
        let completer: Arc<dyn Completer> =
            Arc::new(crate::provider::MockCompleter::new().with_reply("hello", long_reply.clone()));
        let transport = Arc::new(RecordingTransport::new());
        let pipeline = pipeline(&dir, completer, transport.clone());

        pipeline.handle(message("chat-1", "+123", "hello", false)).await;

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].chars().count(), 4000);
        assert!(sent[0].ends_with("..."));
    }

    #[tokio::test]
    async fn transient_provider_error_is_retried_once_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();

        struct FlakyThenOk {
            calls: std::sync::atomic::AtomicU32,
        }
        #[async_trait::async_trait]
        impl Completer for FlakyThenOk {
            async fn complete(
                &self,
                _system: &str,
                _history: &[Turn],
                _prompt: &str,
                _model: &str,
                _max_tokens: u32,
                _temperature: f32,
            ) -> std::result::Result<crate::provider::Completion, crate::provider::ProviderError> {
                let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n == 0 {
                    Err(crate::provider::ProviderError::Timeout("slow".to_string()))
                } else {
                    Ok(crate::provider::Completion {
                        text: "recovered".to_string(),
                        usage: Default::default(),
                        finish_reason: crate::provider::FinishReason::Stop,
                    })
                }
            }
        }

        let completer: Arc<dyn Completer> = Arc::new(FlakyThenOk { calls: std::sync::atomic::AtomicU32::new(0) });
        let transport = Arc::new(RecordingTransport::new());
        let pipeline = pipeline(&dir, completer, transport.clone());

        pipeline.handle(message("chat-1", "+123", "hello", false)).await;

        assert_eq!(transport.sent.lock().unwrap().as_slice(), &["recovered".to_string()]);
    }

    #[tokio::test]
    async fn permanent_provider_error_is_not_retried_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let completer: Arc<dyn Completer> = Arc::new(crate::provider::FailingCompleter(
            crate::provider::ProviderError::Client("bad request".to_string()),
        ));
        let transport = Arc::new(RecordingTransport::new());
        let pipeline = pipeline(&dir, completer, transport.clone());

        pipeline.handle(message("chat-1", "+123", "hello", false)).await;

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &[FixedReplies::default().fallback]);
    }
}
