//! Database schema definitions
//!
//! This module contains the SQL schema for the SQLite frontier backend.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Fingerprints already accepted into the frontier
CREATE TABLE IF NOT EXISTS seen (
    namespace TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    seen_at TEXT NOT NULL,
    PRIMARY KEY (namespace, fingerprint)
) WITHOUT ROWID;

-- Pending jobs, consumed in ascending position order
CREATE TABLE IF NOT EXISTS queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace TEXT NOT NULL,
    position INTEGER NOT NULL,
    payload TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queue_position ON queue(namespace, position);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
