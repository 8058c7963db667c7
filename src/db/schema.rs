//! SQL DDL for all cairn tables.
//!
//! Defines `entities`, `relations`, `knowledge` (the adjacency index),
//! `operation_log`, and `schema_meta`. All DDL uses `IF NOT EXISTS` for
//! idempotent initialization. The saga journal (`pending_cascades`) arrives
//! with schema version 2, see [`super::migrations`].

use rusqlite::Connection;

/// All schema DDL statements for the core tables.
const SCHEMA_SQL: &str = r#"
-- Named entities. observations and journal_refs are JSON arrays kept sorted and unique.
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    entity_type TEXT NOT NULL,
    observations TEXT NOT NULL DEFAULT '[]',
    journal_refs TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);

-- Typed directed edges. No ON DELETE CASCADE: the coordinator removes edges
-- before their endpoint, and the foreign key refuses anything that would dangle.
CREATE TABLE IF NOT EXISTS relations (
    id TEXT PRIMARY KEY,
    from_id TEXT NOT NULL REFERENCES entities(id),
    to_id TEXT NOT NULL REFERENCES entities(id),
    relation_type TEXT NOT NULL,
    journal_refs TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_relations_tuple ON relations(from_id, to_id, relation_type);
CREATE INDEX IF NOT EXISTS idx_relations_to ON relations(to_id);

-- Derived adjacency index: entity id -> JSON array of incident relation ids
CREATE TABLE IF NOT EXISTS knowledge (
    entity_id TEXT PRIMARY KEY,
    relations TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);

-- Audit log
CREATE TABLE IF NOT EXISTS operation_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('distill','create','read','update','delete')),
    table_name TEXT NOT NULL CHECK(table_name IN ('entities','relations','knowledge','observations')),
    success INTEGER NOT NULL,
    message TEXT,
    error TEXT,
    created_at TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
