use cairn::db;
use tempfile::TempDir;

#[test]
fn open_creates_new_db_at_nonexistent_path() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("subdir").join("graph.db");

    assert!(!db_path.exists());

    let conn = db::open_database(&db_path).unwrap();
    assert!(db_path.exists());

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn all_tables_and_indexes_exist() {
    let conn = db::open_memory_database().unwrap();

    let tables: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    for table in [
        "entities",
        "relations",
        "knowledge",
        "operation_log",
        "pending_cascades",
        "schema_meta",
    ] {
        assert!(tables.contains(&table.to_string()), "{table} table missing");
    }

    let indexes: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert!(indexes.contains(&"idx_relations_tuple".to_string()));
    assert!(indexes.contains(&"idx_relations_to".to_string()));
}

#[test]
fn log_check_constraints_reject_unknown_values() {
    let conn = db::open_memory_database().unwrap();
    let result = conn.execute(
        "INSERT INTO operation_log (operation, table_name, success, created_at) \
         VALUES ('truncate', 'entities', 1, '2024-01-01T00:00:00Z')",
        [],
    );
    assert!(result.is_err(), "unknown operation should be rejected by CHECK constraint");
}

#[test]
fn relation_endpoints_must_exist() {
    let conn = db::open_memory_database().unwrap();
    let result = conn.execute(
        "INSERT INTO relations (id, from_id, to_id, relation_type, created_at) \
         VALUES ('r1', 'nope', 'nada', 'knows', '2024-01-01T00:00:00Z')",
        [],
    );
    assert!(result.is_err(), "foreign key should refuse dangling endpoints");
}

#[test]
fn health_check_passes_on_fresh_db() {
    let conn = db::open_memory_database().unwrap();

    let report = db::check_database_health(&conn).unwrap();
    assert!(report.integrity_ok);
    assert_eq!(report.schema_version, db::migrations::CURRENT_SCHEMA_VERSION);
    assert_eq!(report.entity_count, 0);
    assert_eq!(report.relation_count, 0);
    assert_eq!(report.index_entry_count, 0);
    assert_eq!(report.pending_cascades, 0);
    assert!(!report.index_stale);
}

#[test]
fn busy_timeout_is_set() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("test.db");

    let conn = db::open_database(&db_path).unwrap();

    let timeout: i64 = conn
        .pragma_query_value(None, "busy_timeout", |row| row.get(0))
        .unwrap();
    assert_eq!(timeout, 5000);
}
