use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use denidin_core::ids::MemoryId;
pub use denidin_users::MemoryScope as Scope;

/// Discriminant for `MemoryRecord.metadata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Fact,
    SessionSummary,
    SessionSummaryFallback,
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordType::Fact => "fact",
            RecordType::SessionSummary => "session_summary",
            RecordType::SessionSummaryFallback => "session_summary_fallback",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RecordType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fact" => Ok(Self::Fact),
            "session_summary" => Ok(Self::SessionSummary),
            "session_summary_fallback" => Ok(Self::SessionSummaryFallback),
            other => Err(format!("unknown memory record type: {other}")),
        }
    }
}

/// Metadata map common to every `MemoryRecord`, at minimum
/// `{scope, created_at, type}` and optionally the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub scope: Scope,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub user_phone: Option<String>,
    pub session_id: Option<String>,
    pub chat_id: Option<String>,
    pub session_start: Option<DateTime<Utc>>,
    pub session_end: Option<DateTime<Utc>>,
    pub message_count: Option<u64>,
    pub summarization_failed: Option<bool>,
}

impl Metadata {
    /// Defaults for a plain `Remember` call: `scope=PRIVATE`, `type=fact`.
    pub fn fact(now: DateTime<Utc>) -> Self {
        Self {
            scope: Scope::Private,
            created_at: now,
            record_type: RecordType::Fact,
            user_phone: None,
            session_id: None,
            chat_id: None,
            session_start: None,
            session_end: None,
            message_count: None,
            summarization_failed: None,
        }
    }
}

/// A durable long-term record. Scope is assigned at creation
/// and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub collection: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

/// One similarity hit returned by `Recall`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub content: String,
    pub similarity: f64,
    pub collection_name: String,
    pub metadata: Metadata,
}
