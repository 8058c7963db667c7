mod helpers;

use cairn::graph::log::Operation;
use cairn::graph::read;
use cairn::graph::types::{DistillInput, FailureKind};
use helpers::{assert_consistent, entity, rel, test_coordinator};

fn journal(id: &str) -> DistillInput {
    DistillInput {
        journal_id: id.into(),
        entities: vec![
            entity("Tan", "person", &["Tan often craves cheese"]),
            entity("Kiren", "person", &[]),
            entity("Cheese", "food", &[]),
        ],
        relations: vec![rel("Kiren", "Tan", "loves"), rel("Tan", "Cheese", "likes")],
    }
}

#[test]
fn first_distill_creates_everything_with_journal_refs() {
    let coord = test_coordinator();
    let report = coord.distill(&journal("j-1")).unwrap();

    assert_eq!(report.entities_created, 3);
    assert_eq!(report.relations_created, 2);
    assert_eq!(report.relations_linked, 0);

    let graph = coord.with_conn(|c| read::read_graph(c)).unwrap();
    assert!(graph.entities.iter().all(|e| e.journal_refs.contains("j-1")));
    assert!(graph.relations.iter().all(|r| r.journal_refs.contains("j-1")));
    assert_consistent(&coord);
}

#[test]
fn repeated_journal_changes_nothing() {
    let coord = test_coordinator();
    coord.distill(&journal("j-1")).unwrap();
    let before = coord.with_conn(|c| read::read_graph(c)).unwrap();

    let report = coord.distill(&journal("j-1")).unwrap();
    assert_eq!(report.entities_created, 0);
    assert_eq!(report.entities_merged, 3);
    assert_eq!(report.relations_created, 0);
    assert_eq!(report.relations_linked, 2);

    let after = coord.with_conn(|c| read::read_graph(c)).unwrap();
    assert_eq!(before.relations, after.relations);
    let obs = |g: &cairn::graph::types::GraphView| {
        g.entities
            .iter()
            .map(|e| (e.name.clone(), e.observations.clone(), e.journal_refs.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(obs(&before), obs(&after));
}

#[test]
fn second_journal_merges_observations_and_refs() {
    let coord = test_coordinator();
    coord.distill(&journal("j-1")).unwrap();

    let report = coord
        .distill(&DistillInput {
            journal_id: "j-2".into(),
            entities: vec![entity("Tan", "person", &["Tan ate brie today"])],
            relations: vec![rel("Kiren", "Tan", "loves")],
        })
        .unwrap();
    assert_eq!(report.entities_merged, 1);
    assert_eq!(report.relations_linked, 1);

    let graph = coord.with_conn(|c| read::open_nodes(c, &["Tan"])).unwrap();
    let tan = &graph.entities[0];
    assert_eq!(tan.observations.len(), 2);
    assert!(tan.journal_refs.contains("j-1") && tan.journal_refs.contains("j-2"));
    let loves = graph
        .relations
        .iter()
        .find(|r| r.relation_type == "loves")
        .unwrap();
    assert_eq!(loves.journal_refs.len(), 2);
}

#[test]
fn new_relations_stay_all_or_nothing() {
    let coord = test_coordinator();
    let report = coord
        .distill(&DistillInput {
            journal_id: "j-1".into(),
            entities: vec![entity("Tan", "person", &[])],
            relations: vec![rel("Tan", "Tan", "admires"), rel("Tan", "Nobody", "knows")],
        })
        .unwrap();

    assert_eq!(report.relations_created, 0);
    assert_eq!(report.relations[0].kind, Some(FailureKind::Rejected));
    assert_eq!(report.relations[1].kind, Some(FailureKind::NotFound));
    let graph = coord.with_conn(|c| read::read_graph(c)).unwrap();
    assert!(graph.relations.is_empty());
}

#[test]
fn distill_is_logged_once() {
    let coord = test_coordinator();
    coord.distill(&journal("j-1")).unwrap();

    let distills = coord
        .log()
        .recent(20)
        .unwrap()
        .into_iter()
        .filter(|r| r.operation == Operation::Distill)
        .count();
    assert_eq!(distills, 1);
}

#[test]
fn empty_journal_id_is_invalid() {
    let coord = test_coordinator();
    assert!(coord.distill(&journal(" ")).is_err());
}
