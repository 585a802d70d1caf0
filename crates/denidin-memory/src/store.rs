use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{instrument, warn};

use denidin_core::clock::Clock;
use denidin_core::ids::MemoryId;
use denidin_users::MemoryScope as Scope;

use crate::db::init_db;
use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{MemoryError, Result};
use crate::types::{Hit, Metadata, RecordType};

/// The durable, vector-indexed long-term memory repository.
///
/// A single SQLite database holds every collection; `collection` is just a
/// column, not a separate table per name. Recall ranks by brute-force
/// cosine similarity over stored embeddings rather than keyword search.
pub struct MemoryStore {
    conn: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn open(conn: Connection, embedder: Arc<dyn Embedder>, clock: Arc<dyn Clock>) -> Result<Self> {
        init_db(&conn).map_err(|e| MemoryError::Init(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
            clock,
        })
    }

    /// Embeds `content`, stamps `created_at`, defaults `scope=PRIVATE` and
    /// `type=fact`, and stores the record atomically.
    #[instrument(skip(self, content, metadata))]
    pub async fn remember(
        &self,
        content: &str,
        collection: &str,
        metadata: Option<Metadata>,
    ) -> Result<MemoryId> {
        let embedding = self
            .embedder
            .embed(content)
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;

        let now = self.clock.now();
        let metadata = metadata.unwrap_or_else(|| Metadata::fact(now));
        let id = MemoryId::new();
        let sanitized = self.ensure_collection(collection)?;
        let embedding_json = serde_json::to_string(&embedding)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO memory_records
             (id, collection, content, embedding, scope, record_type, created_at,
              user_phone, session_id, chat_id, session_start, session_end,
              message_count, summarization_failed)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                id.as_str(),
                sanitized,
                content,
                embedding_json,
                scope_key(metadata.scope),
                metadata.record_type.to_string(),
                metadata.created_at.to_rfc3339(),
                metadata.user_phone,
                metadata.session_id,
                metadata.chat_id,
                metadata.session_start.map(|t| t.to_rfc3339()),
                metadata.session_end.map(|t| t.to_rfc3339()),
                metadata.message_count,
                metadata.summarization_failed,
            ],
        )?;
        Ok(id)
    }

    /// Embeds `query`, searches each named collection, merges results,
    /// filters by `similarity >= min_similarity`, returns the global top-k
    /// sorted by similarity descending. Missing or empty
    /// collections are skipped, not errors.
    #[instrument(skip(self, query, collection_names))]
    pub async fn recall(
        &self,
        query: &str,
        collection_names: &[String],
        top_k: usize,
        min_similarity: f64,
    ) -> Result<Vec<Hit>> {
        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;

        let mut hits = Vec::new();
        for canonical in collection_names {
            let Some(sanitized) = self.lookup_collection(canonical)? else {
                continue;
            };
            let rows = self.load_collection_rows(&sanitized)?;
            for row in rows {
                let similarity = cosine_similarity(&query_embedding, &row.embedding);
                if similarity < min_similarity {
                    continue;
                }
                hits.push(Hit {
                    content: row.content,
                    similarity,
                    collection_name: canonical.clone(),
                    metadata: row.metadata,
                });
            }
        }

        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// `Recall` post-filtered to hits whose scope is in `allowed_scopes`.
    pub async fn recall_with_scope_filter(
        &self,
        query: &str,
        collection_names: &[String],
        top_k: usize,
        min_similarity: f64,
        allowed_scopes: &[Scope],
    ) -> Result<Vec<Hit>> {
        // Scope filtering can drop results below top_k, so over-fetch before
        // truncating again to keep the final count accurate.
        let fetch_k = top_k.saturating_mul(4).max(top_k);
        let mut hits = self.recall(query, collection_names, fetch_k, min_similarity).await?;
        hits.retain(|h| allowed_scopes.contains(&h.metadata.scope));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Composes the scope filter with an ownership filter.
    /// A hit passes if `scope == PUBLIC` or `metadata.user_phone ==
    /// user_phone`. If `can_see_all_memories` is true, the ownership filter
    /// is skipped but the scope filter is not.
    #[instrument(skip(self, query, collection_names))]
    #[allow(clippy::too_many_arguments)]
    pub async fn recall_with_rbac_filter(
        &self,
        query: &str,
        collection_names: &[String],
        user_phone: &str,
        allowed_scopes: &[Scope],
        can_see_all_memories: bool,
        top_k: usize,
        min_similarity: f64,
    ) -> Result<Vec<Hit>> {
        let fetch_k = top_k.saturating_mul(4).max(top_k);
        let mut hits = self
            .recall_with_scope_filter(query, collection_names, fetch_k, min_similarity, allowed_scopes)
            .await?;
        if !can_see_all_memories {
            hits.retain(|h| h.metadata.scope == Scope::Public || h.metadata.user_phone.as_deref() == Some(user_phone));
        }
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Inspection aid: list records in a collection, optionally filtered by
    /// type, newest-first.
    pub fn list(&self, collection: &str, limit: Option<usize>, type_filter: Option<RecordType>) -> Result<Vec<Hit>> {
        let Some(sanitized) = self.lookup_collection(collection)? else {
            return Ok(Vec::new());
        };
        let mut rows = self.load_collection_rows(&sanitized)?;
        rows.sort_by(|a, b| b.metadata.created_at.cmp(&a.metadata.created_at));
        if let Some(filter) = type_filter {
            rows.retain(|r| r.metadata.record_type == filter);
        }
        let limit = limit.unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|r| Hit {
                content: r.content,
                similarity: 1.0,
                collection_name: collection.to_string(),
                metadata: r.metadata,
            })
            .collect())
    }

    /// Creates the canonical → sanitised mapping lazily on first access.
    fn ensure_collection(&self, canonical: &str) -> Result<String> {
        if let Some(existing) = self.lookup_collection(canonical)? {
            return Ok(existing);
        }
        let sanitized = sanitize_collection_name(canonical);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO collections (canonical_name, sanitized_name) VALUES (?1, ?2)",
            params![canonical, sanitized],
        )?;
        Ok(sanitized)
    }

    fn lookup_collection(&self, canonical: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let sanitized: Option<String> = conn
            .query_row(
                "SELECT sanitized_name FROM collections WHERE canonical_name = ?1",
                params![canonical],
                |row| row.get(0),
            )
            .optional()?;
        Ok(sanitized)
    }

    fn load_collection_rows(&self, sanitized: &str) -> Result<Vec<StoredRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT content, embedding, scope, record_type, created_at, user_phone,
                    session_id, chat_id, session_start, session_end, message_count,
                    summarization_failed
             FROM memory_records WHERE collection = ?1",
        )?;
        let rows = stmt.query_map(params![sanitized], row_to_stored)?;
        let mut out = Vec::new();
        for row in rows {
            match row {
                Ok(r) => out.push(r),
                Err(e) => warn!("skipping unreadable memory record: {e}"),
            }
        }
        Ok(out)
    }
}

struct StoredRow {
    content: String,
    embedding: Vec<f32>,
    metadata: Metadata,
}

fn row_to_stored(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRow> {
    let embedding_json: String = row.get(1)?;
    let embedding: Vec<f32> = serde_json::from_str(&embedding_json).unwrap_or_default();
    let scope_str: String = row.get(2)?;
    let type_str: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let session_start: Option<String> = row.get(8)?;
    let session_end: Option<String> = row.get(9)?;

    Ok(StoredRow {
        content: row.get(0)?,
        embedding,
        metadata: Metadata {
            scope: parse_scope(&scope_str),
            created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                .map(|t| t.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now()),
            record_type: type_str.parse().unwrap_or(RecordType::Fact),
            user_phone: row.get(5)?,
            session_id: row.get(6)?,
            chat_id: row.get(7)?,
            session_start: session_start.and_then(|s| {
                chrono::DateTime::parse_from_rfc3339(&s).ok().map(|t| t.with_timezone(&chrono::Utc))
            }),
            session_end: session_end.and_then(|s| {
                chrono::DateTime::parse_from_rfc3339(&s).ok().map(|t| t.with_timezone(&chrono::Utc))
            }),
            message_count: row.get(10)?,
            summarization_failed: row.get(11)?,
        },
    })
}

fn scope_key(scope: Scope) -> &'static str {
    match scope {
        Scope::Public => "public",
        Scope::Private => "private",
        Scope::System => "system",
    }
}

fn parse_scope(s: &str) -> Scope {
    match s {
        "public" => Scope::Public,
        "system" => Scope::System,
        _ => Scope::Private,
    }
}

/// Deterministic, bijective-in-practice sanitisation: every character the
/// underlying vector engine forbids is
/// replaced with an escape sequence that cannot collide with allowed
/// characters, so distinct canonical names never sanitise to the same
/// on-disk key. The `collections` table keeps the reverse mapping so the
/// core always reports the caller-supplied canonical name.
fn sanitize_collection_name(canonical: &str) -> String {
    let mut out = String::with_capacity(canonical.len());
    for c in canonical.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => out.push(c),
            '-' => out.push_str("_d_"),
            _ => out.push_str(&format!("_x{:04x}_", c as u32)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use denidin_core::clock::SystemClock;

    fn store() -> MemoryStore {
        let conn = Connection::open_in_memory().unwrap();
        MemoryStore::open(conn, Arc::new(HashEmbedder::default()), Arc::new(SystemClock)).unwrap()
    }

    #[tokio::test]
    async fn remember_then_recall_returns_near_one_similarity() {
        let store = store();
        store.remember("the cafe opens at nine", "notes", None).await.unwrap();
        let hits = store
            .recall("the cafe opens at nine", &["notes".to_string()], 5, 0.0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn recall_skips_missing_collections_without_error() {
        let store = store();
        let hits = store.recall("anything", &["does-not-exist".to_string()], 5, 0.0).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn recall_results_sorted_descending_and_respect_min_similarity() {
        let store = store();
        store.remember("apples and oranges", "c", None).await.unwrap();
        store.remember("rockets and satellites", "c", None).await.unwrap();
        let hits = store.recall("apples oranges", &["c".to_string()], 10, 0.0).await.unwrap();
        assert!(hits.len() >= 1);
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        let strict = store.recall("apples oranges", &["c".to_string()], 10, 0.999).await.unwrap();
        assert!(strict.iter().all(|h| h.similarity >= 0.999));
    }

    #[tokio::test]
    async fn rbac_filter_scenario_s2() {
        let store = store();
        let mut public = Metadata::fact(chrono::Utc::now());
        public.scope = Scope::Public;
        store.remember("public", "memory_chat_B", Some(public)).await.unwrap();

        let mut secret_a = Metadata::fact(chrono::Utc::now());
        secret_a.scope = Scope::Private;
        secret_a.user_phone = Some("+972501111111".to_string());
        store.remember("secret_A", "memory_chat_B", Some(secret_a)).await.unwrap();

        let mut secret_b = Metadata::fact(chrono::Utc::now());
        secret_b.scope = Scope::Private;
        secret_b.user_phone = Some("+972502222222".to_string());
        store.remember("secret_B", "memory_chat_B", Some(secret_b)).await.unwrap();

        let allowed = vec![Scope::Public, Scope::Private];
        let own_only = store
            .recall_with_rbac_filter(
                "secret",
                &["memory_chat_B".to_string()],
                "+972501111111",
                &allowed,
                false,
                10,
                0.0,
            )
            .await
            .unwrap();
        let mut contents: Vec<_> = own_only.iter().map(|h| h.content.clone()).collect();
        contents.sort();
        assert_eq!(contents, vec!["public".to_string(), "secret_A".to_string()]);

        let see_all = store
            .recall_with_rbac_filter(
                "secret",
                &["memory_chat_B".to_string()],
                "+972501111111",
                &allowed,
                true,
                10,
                0.0,
            )
            .await
            .unwrap();
        let mut contents: Vec<_> = see_all.iter().map(|h| h.content.clone()).collect();
        contents.sort();
        assert_eq!(contents, vec!["public".to_string(), "secret_A".to_string(), "secret_B".to_string()]);
    }

    #[tokio::test]
    async fn collection_names_with_forbidden_characters_round_trip_canonical_name() {
        let store = store();
        store.remember("hello", "chat@some:thing", None).await.unwrap();
        let hits = store.recall("hello", &["chat@some:thing".to_string()], 5, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].collection_name, "chat@some:thing");
    }

    #[tokio::test]
    async fn list_honours_type_filter() {
        let store = store();
        store.remember("fact one", "notes", None).await.unwrap();
        let mut summary = Metadata::fact(chrono::Utc::now());
        summary.record_type = RecordType::SessionSummary;
        store.remember("summary one", "notes", Some(summary)).await.unwrap();

        let facts = store.list("notes", None, Some(RecordType::Fact)).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].content, "fact one");
    }
}
