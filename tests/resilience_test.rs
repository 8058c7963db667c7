mod helpers;

use cairn::db::migrations;
use cairn::graph::error::GraphError;
use cairn::graph::log::{Operation, OperationRecord, Table};
use cairn::graph::read;
use helpers::{assert_consistent, disk_coordinator, rel, seed_household, test_coordinator};
use tempfile::TempDir;

#[test]
fn graph_and_log_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("graph.db");

    {
        let coord = disk_coordinator(&path);
        seed_household(&coord);
        coord.log().close().unwrap();
    }

    let coord = disk_coordinator(&path);
    let graph = coord.with_conn(|c| read::read_graph(c)).unwrap();
    assert_eq!(graph.entities.len(), 3);
    assert_eq!(graph.relations.len(), 2);
    // create entities, create relations, attach
    assert_eq!(coord.log().count(false).unwrap(), 3);
    assert_consistent(&coord);
}

#[test]
fn closed_log_rejects_appends_but_mutations_still_apply() {
    let coord = test_coordinator();
    coord.log().close().unwrap();
    coord.log().close().unwrap();

    let err = coord
        .log()
        .append(&OperationRecord::succeeded(Operation::Read, Table::Entities, "x"))
        .unwrap_err();
    assert!(matches!(err, GraphError::LogClosed));

    // the log is observational: the write goes through regardless
    seed_household(&coord);
    let graph = coord.with_conn(|c| read::read_graph(c)).unwrap();
    assert_eq!(graph.entities.len(), 3);
}

#[test]
fn attach_failure_flags_stale_and_repair_rebuilds() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("graph.db");
    let coord = disk_coordinator(&path);
    seed_household(&coord);

    coord
        .with_conn(|c| Ok(c.execute_batch("DROP TABLE knowledge")?))
        .unwrap();
    let results = coord
        .create_relations(&[rel("Cheese", "Kiren", "tempts")])
        .unwrap();
    // relations are committed even though the index could not follow
    assert!(results[0].success);
    assert!(coord
        .with_conn(|c| Ok(migrations::is_index_stale(c)?))
        .unwrap());

    let gap = coord
        .log()
        .recent(5)
        .unwrap()
        .into_iter()
        .find(|r| r.table == Table::Knowledge && !r.success)
        .expect("gap should be logged");
    assert!(gap.error.unwrap().contains("out of sync"));

    coord
        .with_conn(|c| Ok(cairn::db::schema::init_schema(c)?))
        .unwrap();
    let repair = coord.repair().unwrap();
    assert!(repair.rebuilt.is_some());
    assert!(repair.consistency.is_consistent(), "{:?}", repair.consistency);
    assert!(!coord
        .with_conn(|c| Ok(migrations::is_index_stale(c)?))
        .unwrap());
}

#[test]
fn repair_on_healthy_graph_is_a_no_op() {
    let coord = test_coordinator();
    seed_household(&coord);

    let repair = coord.repair().unwrap();
    assert!(repair.resumed.is_empty());
    assert!(repair.rebuilt.is_none());
    assert!(repair.consistency.is_consistent());
}

#[test]
fn shared_coordinator_handles_concurrent_writers() {
    let coord = std::sync::Arc::new(test_coordinator());
    seed_household(&coord);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let coord = std::sync::Arc::clone(&coord);
            std::thread::spawn(move || {
                let name = format!("Friend{i}");
                coord
                    .create_entities(&[helpers::entity(&name, "person", &[])])
                    .unwrap();
                coord
                    .create_relations(&[rel(&name, "Tan", "knows")])
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let graph = coord.with_conn(|c| read::read_graph(c)).unwrap();
    assert_eq!(graph.entities.len(), 7);
    assert_eq!(graph.relations.len(), 6);
    assert_consistent(&coord);
}
