#![allow(dead_code)]

use cairn::db;
use cairn::graph::coordinator::Coordinator;
use cairn::graph::index::IndexPolicy;
use cairn::graph::log::OperationLog;
use cairn::graph::maintenance::verify_consistency;
use cairn::graph::types::{EntityInput, RelationInput, RelationKey};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Coordinator over an in-memory graph and a private in-memory log.
pub fn test_coordinator() -> Coordinator {
    coordinator_with_policy(IndexPolicy::default())
}

pub fn coordinator_with_policy(policy: IndexPolicy) -> Coordinator {
    let log = OperationLog::open_in_memory().unwrap();
    Coordinator::new(Arc::new(Mutex::new(test_db())), Arc::new(log), policy)
}

/// Coordinator over an on-disk database, with the log sharing the file.
pub fn disk_coordinator(path: &std::path::Path) -> Coordinator {
    let conn = db::open_database(path).unwrap();
    let log = OperationLog::open(path).unwrap();
    Coordinator::new(
        Arc::new(Mutex::new(conn)),
        Arc::new(log),
        IndexPolicy::default(),
    )
}

pub fn entity(name: &str, entity_type: &str, observations: &[&str]) -> EntityInput {
    EntityInput {
        name: name.into(),
        entity_type: entity_type.into(),
        observations: observations.iter().map(|s| s.to_string()).collect(),
        journal_refs: vec![],
    }
}

pub fn rel(from: &str, to: &str, relation_type: &str) -> RelationInput {
    RelationInput {
        from: from.into(),
        to: to.into(),
        relation_type: relation_type.into(),
        journal_refs: vec![],
    }
}

pub fn key(from: &str, to: &str, relation_type: &str) -> RelationKey {
    RelationKey {
        from: from.into(),
        to: to.into(),
        relation_type: relation_type.into(),
    }
}

/// The example household: Tan, Kiren and Cheese, with Kiren loving Tan and
/// Tan liking cheese.
pub fn seed_household(coord: &Coordinator) {
    let results = coord
        .create_entities(&[
            entity("Tan", "person", &["Tan often craves cheese"]),
            entity("Kiren", "person", &["Kiren works as a nurse"]),
            entity("Cheese", "food", &[]),
        ])
        .unwrap();
    assert!(results.iter().all(|r| r.success));
    let results = coord
        .create_relations(&[rel("Kiren", "Tan", "loves"), rel("Tan", "Cheese", "likes")])
        .unwrap();
    assert!(results.iter().all(|r| r.success));
}

/// Panic unless every index entry equals the set derived from the relations.
pub fn assert_consistent(coord: &Coordinator) {
    let report = coord
        .with_conn(|c| verify_consistency(c, coord.policy()))
        .unwrap();
    assert!(report.is_consistent(), "graph inconsistent: {report:?}");
}
