mod helpers;

use cairn::graph::read;
use cairn::graph::types::{EntityPatch, FailureKind, ObservationAddition, ObservationDeletion};
use helpers::{entity, test_coordinator};

#[test]
fn names_are_unique_across_calls_and_within_a_batch() {
    let coord = test_coordinator();

    let first = coord.create_entities(&[entity("Tan", "person", &[])]).unwrap();
    assert!(first[0].success);
    let tan_id = first[0].id.clone().unwrap();

    let results = coord
        .create_entities(&[
            entity("Tan", "person", &[]),
            entity("Kiren", "person", &[]),
            entity("Kiren", "cat", &[]),
        ])
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].kind, Some(FailureKind::Conflict));
    assert_eq!(results[0].id.as_deref(), Some(tan_id.as_str()));
    assert!(results[1].success);
    assert_eq!(results[2].kind, Some(FailureKind::Conflict));
    assert_eq!(results[2].id, results[1].id);

    let all = coord.with_conn(|c| read::brief_entities(c)).unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn observations_are_a_set() {
    let coord = test_coordinator();
    coord.create_entities(&[entity("A", "thing", &["y"])]).unwrap();

    let results = coord
        .add_observations(&[ObservationAddition {
            entity_name: "A".into(),
            contents: vec!["x".into(), "x".into(), "y".into()],
        }])
        .unwrap();
    assert_eq!(results[0].added, Some(vec!["x".to_string()]));

    let graph = coord.with_conn(|c| read::read_graph(c)).unwrap();
    let observations: Vec<&str> = graph.entities[0].observations.iter().map(String::as_str).collect();
    assert_eq!(observations, vec!["x", "y"]);
}

#[test]
fn observation_batch_continues_past_missing_entity() {
    let coord = test_coordinator();
    coord.create_entities(&[entity("A", "thing", &[])]).unwrap();

    let results = coord
        .add_observations(&[
            ObservationAddition {
                entity_name: "Ghost".into(),
                contents: vec!["boo".into()],
            },
            ObservationAddition {
                entity_name: "A".into(),
                contents: vec!["real".into()],
            },
        ])
        .unwrap();
    assert_eq!(results[0].kind, Some(FailureKind::NotFound));
    assert!(results[1].success);
}

#[test]
fn delete_observations_reports_what_was_removed() {
    let coord = test_coordinator();
    coord
        .create_entities(&[entity("A", "thing", &["keep", "drop"])])
        .unwrap();

    let results = coord
        .delete_observations(&[ObservationDeletion {
            entity_name: "A".into(),
            observations: vec!["drop".into(), "never there".into()],
        }])
        .unwrap();
    assert!(results[0].success);
    assert_eq!(results[0].removed, Some(vec!["drop".to_string()]));
}

#[test]
fn rename_onto_existing_name_conflicts() {
    let coord = test_coordinator();
    let created = coord
        .create_entities(&[entity("A", "thing", &[]), entity("B", "thing", &[])])
        .unwrap();
    let b_id = created[1].id.clone().unwrap();

    let results = coord
        .update_entities(&[
            EntityPatch {
                id: b_id.clone(),
                name: Some("A".into()),
                ..Default::default()
            },
            EntityPatch {
                id: b_id,
                entity_type: Some("place".into()),
                ..Default::default()
            },
        ])
        .unwrap();
    assert_eq!(results[0].kind, Some(FailureKind::Conflict));
    assert!(results[1].success);
    assert_eq!(results[1].name, "B");
}

#[test]
fn entity_batches_are_logged_with_failure_counts() {
    let coord = test_coordinator();
    coord.create_entities(&[entity("A", "thing", &[])]).unwrap();
    coord
        .create_entities(&[entity("A", "thing", &[]), entity("B", "thing", &[])])
        .unwrap();

    let records = coord.log().recent(10).unwrap();
    assert_eq!(records.len(), 2);
    assert!(!records[0].success);
    assert_eq!(records[0].message.as_deref(), Some("1 of 2 item(s) applied"));
    assert!(records[1].success);
}
