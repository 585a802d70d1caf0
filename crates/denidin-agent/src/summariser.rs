use std::sync::Arc;

use tracing::{instrument, warn};

use denidin_core::ids::MemoryId;
use denidin_memory::{MemoryStore, Metadata, RecordType};
use denidin_sessions::{Session, SessionStore};

use crate::provider::Completer;

const SUMMARY_PREAMBLE: &str =
    "Summarise key topics, decisions, and action items from the following \
     conversation. Keep the summary under 500 words.";

/// Result of summarising one expired session.
#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub ok: bool,
    pub memory_id: Option<MemoryId>,
    pub used_fallback: bool,
}

/// Converts an expiring session into a long-term memory entry, falling back
/// to the raw transcript when the LLM is unavailable or fails.
pub struct Summariser {
    sessions: Arc<SessionStore>,
    memory: Arc<MemoryStore>,
    completer: Arc<dyn Completer>,
    model: String,
}

impl Summariser {
    pub fn new(
        sessions: Arc<SessionStore>,
        memory: Arc<MemoryStore>,
        completer: Arc<dyn Completer>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            memory,
            completer,
            model: model.into(),
        }
    }

    /// `Summarise(session) → MemoryRecord`, reported as a `SummaryOutcome`.
    /// Never returns an `Err` the caller must branch on: every failure path
    /// downgrades to the raw-transcript fallback so no expired session is
    /// ever dropped without a durable memory record.
    #[instrument(skip(self, session), fields(session_id = %session.id, chat_id = %session.chat_id))]
    pub async fn summarise(&self, session: &Session) -> SummaryOutcome {
        // Resolved by the session's own id, not re-resolved through the
        // chat_id index: at startup, a session recovered from the
        // untransferred-archived sweep may not yet be present in the
        // in-memory index under its chat_id.
        let transcript = match self.sessions.history_for_session(session) {
            Ok(turns) => render_transcript(&turns),
            Err(e) => {
                warn!("failed to load transcript for session {}: {e}", session.id);
                String::new()
            }
        };

        let completion = self
            .completer
            .complete(SUMMARY_PREAMBLE, &[], &transcript, &self.model, 700, 0.2)
            .await;

        let collection = crate::history::per_chat_collection(&session.chat_id);

        let (content, record_type, summarization_failed, used_fallback) = match completion {
            Ok(completion) => (completion.text, RecordType::SessionSummary, false, false),
            Err(e) => {
                warn!("summarisation failed for session {}, falling back to raw transcript: {e}", session.id);
                (transcript, RecordType::SessionSummaryFallback, true, true)
            }
        };

        let mut metadata = Metadata::fact(session.last_active);
        metadata.record_type = record_type;
        metadata.session_id = Some(session.id.to_string());
        metadata.chat_id = Some(session.chat_id.clone());
        metadata.session_start = Some(session.created_at);
        metadata.session_end = Some(session.last_active);
        metadata.message_count = Some(session.message_ids.len() as u64);
        metadata.summarization_failed = Some(summarization_failed);

        match self.memory.remember(&content, &collection, Some(metadata)).await {
            Ok(memory_id) => SummaryOutcome {
                ok: true,
                memory_id: Some(memory_id),
                used_fallback,
            },
            Err(e) => {
                warn!("failed to persist memory record for session {}: {e}", session.id);
                SummaryOutcome {
                    ok: false,
                    memory_id: None,
                    used_fallback,
                }
            }
        }
    }
}

fn render_transcript(turns: &[(denidin_sessions::MessageRole, String)]) -> String {
    turns
        .iter()
        .map(|(role, content)| format!("{role}: {content}"))
        .collect::<Vec<_>>()
        .join("\n")
}
