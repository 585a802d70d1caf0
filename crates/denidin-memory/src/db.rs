use rusqlite::{Connection, Result};

/// Initialise the long-term memory schema. Safe to call on every startup
/// (idempotent): one `CREATE TABLE IF NOT EXISTS` per concern, called once
/// at store construction.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_collections_table(conn)?;
    create_records_table(conn)?;
    Ok(())
}

/// Canonical (caller-facing) name ↔ sanitised (on-disk) name mapping.
/// Collections are created lazily on first access, so this table only ever
/// grows by insertion, never by a separate "create collection" call.
fn create_collections_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS collections (
            canonical_name  TEXT NOT NULL PRIMARY KEY,
            sanitized_name  TEXT NOT NULL UNIQUE
        );",
    )
}

fn create_records_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_records (
            id                      TEXT NOT NULL PRIMARY KEY,
            collection              TEXT NOT NULL,
            content                 TEXT NOT NULL,
            embedding               TEXT NOT NULL,
            scope                   TEXT NOT NULL,
            record_type             TEXT NOT NULL,
            created_at              TEXT NOT NULL,
            user_phone              TEXT,
            session_id              TEXT,
            chat_id                 TEXT,
            session_start           TEXT,
            session_end             TEXT,
            message_count           INTEGER,
            summarization_failed    INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_records_collection
            ON memory_records(collection);",
    )
}
