//! Forward-only schema migration framework.
//!
//! Tracks the schema version in `schema_meta` and runs sequential migrations
//! to bring the database up to [`CURRENT_SCHEMA_VERSION`]. Also owns the small
//! key/value flags the knowledge index keeps in `schema_meta`.

use rusqlite::{Connection, OptionalExtension};

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

/// Update the stored schema version.
fn update_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = ?1",
        [key],
        |row| row.get::<_, String>(0),
    )
    .optional()
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Endpoint policy the stored knowledge index was built with, if recorded.
pub fn get_index_endpoints(conn: &Connection) -> rusqlite::Result<Option<String>> {
    get_meta(conn, "index_endpoints")
}

/// Record the endpoint policy the knowledge index is maintained with.
pub fn set_index_endpoints(conn: &Connection, endpoints: &str) -> rusqlite::Result<()> {
    set_meta(conn, "index_endpoints", endpoints)
}

/// `true` when a relation mutation committed without its index update.
pub fn is_index_stale(conn: &Connection) -> rusqlite::Result<bool> {
    Ok(get_meta(conn, "index_stale")?.as_deref() == Some("1"))
}

/// Set or clear the stale-index flag.
pub fn set_index_stale(conn: &Connection, stale: bool) -> rusqlite::Result<()> {
    set_meta(conn, "index_stale", if stale { "1" } else { "0" })
}

/// Run any pending forward-only migrations.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(schema_version = version, target = CURRENT_SCHEMA_VERSION, "checking migrations");

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");

        match next {
            2 => migrate_v1_to_v2(conn)?,
            _ => {
                tracing::error!(version = next, "unknown migration target");
                break;
            }
        }

        update_schema_version(conn, next)?;
        version = next;
    }

    Ok(())
}

/// Migration v1 → v2: saga journal for entity-delete cascades, and the
/// recorded index endpoint policy.
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS pending_cascades (
    entity_name TEXT PRIMARY KEY,
    entity_id TEXT,
    last_step TEXT NOT NULL,
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('index_endpoints', 'both');
"#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn get_schema_version_returns_1_on_fresh_db() {
        let conn = test_db();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn run_migrations_upgrades_to_current() {
        let conn = test_db();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn migration_v1_to_v2_adds_saga_journal() {
        let conn = test_db();
        assert!(get_index_endpoints(&conn).unwrap().is_none());

        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM pending_cascades", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(get_index_endpoints(&conn).unwrap().as_deref(), Some("both"));
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = test_db();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap(); // second call should not error
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn stale_flag_round_trips() {
        let conn = test_db();
        assert!(!is_index_stale(&conn).unwrap());
        set_index_stale(&conn, true).unwrap();
        assert!(is_index_stale(&conn).unwrap());
        set_index_stale(&conn, false).unwrap();
        assert!(!is_index_stale(&conn).unwrap());
    }
}
