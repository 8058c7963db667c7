//! Entity store — batch create, observation set maintenance, patches, lookups.
//!
//! Every public batch function runs inside one transaction and returns one
//! [`EntityResult`] per input item, in input order. A bad item never aborts its
//! siblings; only storage errors fail the whole call. Deleting entities is not
//! done here: it must cascade through relations and the knowledge index, see
//! [`crate::graph::coordinator::Coordinator::delete_entities`].

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashMap};

use super::error::{GraphError, Result};
use super::types::{
    BriefEntity, Entity, EntityInput, EntityPatch, EntityResult, ObservationAddition,
    ObservationDeletion,
};
use super::{decode_set, encode_set, now};

const ENTITY_COLUMNS: &str = "id, name, entity_type, observations, journal_refs, updated_at";

pub(crate) fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: row.get(2)?,
        observations: decode_set(row, 3)?,
        journal_refs: decode_set(row, 4)?,
        updated_at: row.get(5)?,
    })
}

/// Create entities. Names already taken (in the store or earlier in the batch)
/// fail with a conflict carrying the existing id.
pub fn create_entities(conn: &mut Connection, items: &[EntityInput]) -> Result<Vec<EntityResult>> {
    let tx = conn.transaction()?;
    let mut results = Vec::with_capacity(items.len());

    for item in items {
        let result = match insert_entity(&tx, item) {
            Ok(id) => EntityResult::ok(&item.name, id),
            Err(e) => EntityResult::from_error(&item.name, e)?,
        };
        results.push(result);
    }

    tx.commit()?;
    Ok(results)
}

fn insert_entity(conn: &Connection, item: &EntityInput) -> Result<String> {
    if item.name.trim().is_empty() {
        return Err(GraphError::Validation("entity name must not be empty".into()));
    }
    if let Some(existing_id) = find_id_by_name(conn, &item.name)? {
        return Err(GraphError::Conflict {
            what: "entity",
            key: item.name.clone(),
            existing_id,
        });
    }

    let id = uuid::Uuid::now_v7().to_string();
    let observations: BTreeSet<String> = item.observations.iter().cloned().collect();
    let journal_refs: BTreeSet<String> = item.journal_refs.iter().cloned().collect();

    conn.execute(
        "INSERT INTO entities (id, name, entity_type, observations, journal_refs, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            item.name,
            item.entity_type,
            encode_set(&observations)?,
            encode_set(&journal_refs)?,
            now(),
        ],
    )?;
    Ok(id)
}

/// Union new observations into each named entity. The result lists the
/// observations that were not already present, in first-seen order.
pub fn add_observations(
    conn: &mut Connection,
    items: &[ObservationAddition],
) -> Result<Vec<EntityResult>> {
    let tx = conn.transaction()?;
    let mut results = Vec::with_capacity(items.len());

    for item in items {
        let Some(mut entity) = get_entity_by_name(&tx, &item.entity_name)? else {
            results.push(EntityResult::from_error(
                &item.entity_name,
                GraphError::not_found("entity", &item.entity_name),
            )?);
            continue;
        };

        let mut added = Vec::new();
        for content in &item.contents {
            if entity.observations.insert(content.clone()) {
                added.push(content.clone());
            }
        }
        save_sets(&tx, &entity)?;

        let mut result = EntityResult::ok(&entity.name, &entity.id);
        result.added = Some(added);
        results.push(result);
    }

    tx.commit()?;
    Ok(results)
}

/// Remove observations from each named entity. Observations that are not
/// present are ignored.
pub fn delete_observations(
    conn: &mut Connection,
    items: &[ObservationDeletion],
) -> Result<Vec<EntityResult>> {
    let tx = conn.transaction()?;
    let mut results = Vec::with_capacity(items.len());

    for item in items {
        let Some(mut entity) = get_entity_by_name(&tx, &item.entity_name)? else {
            results.push(EntityResult::from_error(
                &item.entity_name,
                GraphError::not_found("entity", &item.entity_name),
            )?);
            continue;
        };

        let removed: Vec<String> = item
            .observations
            .iter()
            .filter(|o| entity.observations.remove(*o))
            .cloned()
            .collect();
        save_sets(&tx, &entity)?;

        let mut result = EntityResult::ok(&entity.name, &entity.id);
        result.removed = Some(removed);
        results.push(result);
    }

    tx.commit()?;
    Ok(results)
}

/// Apply a batch of patches. Each item fails independently.
pub fn update_entities(conn: &mut Connection, patches: &[EntityPatch]) -> Result<Vec<EntityResult>> {
    let tx = conn.transaction()?;
    let mut results = Vec::with_capacity(patches.len());

    for patch in patches {
        let result = match update_entity(&tx, patch) {
            Ok(entity) => EntityResult::ok(entity.name, entity.id),
            Err(e) => {
                let label = patch.name.clone().unwrap_or_else(|| patch.id.clone());
                EntityResult::from_error(label, e)?
            }
        };
        results.push(result);
    }

    tx.commit()?;
    Ok(results)
}

/// Patch a single entity by id. Missing ids and rename collisions are errors.
/// Always bumps `updated_at`.
pub fn update_entity(conn: &Connection, patch: &EntityPatch) -> Result<Entity> {
    let mut entity =
        get_entity(conn, &patch.id)?.ok_or_else(|| GraphError::not_found("entity", &patch.id))?;

    if let Some(name) = &patch.name {
        if name.trim().is_empty() {
            return Err(GraphError::Validation("entity name must not be empty".into()));
        }
        if let Some(existing_id) = find_id_by_name(conn, name)? {
            if existing_id != entity.id {
                return Err(GraphError::Conflict {
                    what: "entity",
                    key: name.clone(),
                    existing_id,
                });
            }
        }
        entity.name = name.clone();
    }
    if let Some(entity_type) = &patch.entity_type {
        entity.entity_type = entity_type.clone();
    }
    if let Some(observations) = &patch.observations {
        entity.observations = observations.iter().cloned().collect();
    }
    if let Some(journal_refs) = &patch.journal_refs {
        entity.journal_refs = journal_refs.iter().cloned().collect();
    }
    entity.updated_at = now();

    conn.execute(
        "UPDATE entities SET name = ?1, entity_type = ?2, observations = ?3, journal_refs = ?4, updated_at = ?5 \
         WHERE id = ?6",
        params![
            entity.name,
            entity.entity_type,
            encode_set(&entity.observations)?,
            encode_set(&entity.journal_refs)?,
            entity.updated_at,
            entity.id,
        ],
    )?;
    Ok(entity)
}

/// Outcome of merging one distilled entity.
#[derive(Debug)]
pub struct MergedEntity {
    pub result: EntityResult,
    pub created: bool,
}

/// Create-or-merge entities extracted from a journal. Missing entities are
/// created; existing ones get their observations unioned. Both gain
/// `journal_id` in their journal refs.
pub fn merge_entities(
    conn: &mut Connection,
    items: &[EntityInput],
    journal_id: &str,
) -> Result<Vec<MergedEntity>> {
    let tx = conn.transaction()?;
    let mut merged = Vec::with_capacity(items.len());

    for item in items {
        match get_entity_by_name(&tx, &item.name)? {
            Some(mut entity) => {
                let mut added = Vec::new();
                for content in &item.observations {
                    if entity.observations.insert(content.clone()) {
                        added.push(content.clone());
                    }
                }
                entity.journal_refs.extend(item.journal_refs.iter().cloned());
                entity.journal_refs.insert(journal_id.to_string());
                save_sets(&tx, &entity)?;

                let mut result = EntityResult::ok(&entity.name, &entity.id);
                result.added = Some(added);
                merged.push(MergedEntity {
                    result,
                    created: false,
                });
            }
            None => {
                let mut input = item.clone();
                input.journal_refs.push(journal_id.to_string());
                let result = match insert_entity(&tx, &input) {
                    Ok(id) => EntityResult::ok(&item.name, id),
                    Err(e) => EntityResult::from_error(&item.name, e)?,
                };
                let created = result.success;
                merged.push(MergedEntity { result, created });
            }
        }
    }

    tx.commit()?;
    Ok(merged)
}

fn save_sets(conn: &Connection, entity: &Entity) -> Result<()> {
    conn.execute(
        "UPDATE entities SET observations = ?1, journal_refs = ?2, updated_at = ?3 WHERE id = ?4",
        params![
            encode_set(&entity.observations)?,
            encode_set(&entity.journal_refs)?,
            now(),
            entity.id,
        ],
    )?;
    Ok(())
}

/// Delete a single entity row by id. Fails with NotFound if it is absent, and
/// with a foreign-key error if relations still reference it.
pub fn delete_entity_row(conn: &mut Connection, id: &str) -> Result<()> {
    let tx = conn.transaction()?;
    let rows = tx.execute("DELETE FROM entities WHERE id = ?1", params![id])?;
    if rows == 0 {
        return Err(GraphError::not_found("entity", id));
    }
    tx.commit()?;
    Ok(())
}

pub fn find_id_by_name(conn: &Connection, name: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT id FROM entities WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn get_entity_by_name(conn: &Connection, name: &str) -> Result<Option<Entity>> {
    Ok(conn
        .query_row(
            &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE name = ?1"),
            params![name],
            entity_from_row,
        )
        .optional()?)
}

pub fn get_entity(conn: &Connection, id: &str) -> Result<Option<Entity>> {
    Ok(conn
        .query_row(
            &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1"),
            params![id],
            entity_from_row,
        )
        .optional()?)
}

/// Resolve names to ids, one lookup per distinct name. Unknown names are
/// absent from the returned map.
pub fn resolve_names<'a>(
    conn: &Connection,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<HashMap<String, String>> {
    let mut stmt = conn.prepare_cached("SELECT id FROM entities WHERE name = ?1")?;
    let mut resolved = HashMap::new();
    let mut seen = BTreeSet::new();

    for name in names {
        if !seen.insert(name) {
            continue;
        }
        let id: Option<String> = stmt.query_row(params![name], |row| row.get(0)).optional()?;
        if let Some(id) = id {
            resolved.insert(name.to_string(), id);
        }
    }
    Ok(resolved)
}

/// All entities, ordered by name.
pub fn all_entities(conn: &Connection) -> Result<Vec<Entity>> {
    let mut stmt = conn.prepare(&format!("SELECT {ENTITY_COLUMNS} FROM entities ORDER BY name"))?;
    let entities = stmt
        .query_map([], entity_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entities)
}

/// Entities with the given ids, ordered by name. Unknown ids are skipped.
pub fn entities_by_ids<'a>(
    conn: &Connection,
    ids: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<Entity>> {
    let mut stmt =
        conn.prepare_cached(&format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1"))?;
    let mut entities = Vec::new();
    for id in ids {
        if let Some(entity) = stmt.query_row(params![id], entity_from_row).optional()? {
            entities.push(entity);
        }
    }
    entities.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entities)
}

pub fn brief_entities(conn: &Connection) -> Result<Vec<BriefEntity>> {
    let mut stmt = conn.prepare("SELECT name, entity_type FROM entities ORDER BY name")?;
    let entities = stmt
        .query_map([], |row| {
            Ok(BriefEntity {
                name: row.get(0)?,
                entity_type: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::graph::types::FailureKind;

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    fn input(name: &str, entity_type: &str, observations: &[&str]) -> EntityInput {
        EntityInput {
            name: name.into(),
            entity_type: entity_type.into(),
            observations: observations.iter().map(|s| s.to_string()).collect(),
            journal_refs: vec![],
        }
    }

    #[test]
    fn test_create_entities_basic() {
        let mut conn = test_db();
        let results = create_entities(
            &mut conn,
            &[input("Tan", "person", &["Tan often craves cheese"])],
        )
        .unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        let id = results[0].id.clone().unwrap();

        let entity = get_entity(&conn, &id).unwrap().unwrap();
        assert_eq!(entity.name, "Tan");
        assert_eq!(entity.entity_type, "person");
        assert!(entity.observations.contains("Tan often craves cheese"));
        assert!(entity.journal_refs.is_empty());
    }

    #[test]
    fn test_create_duplicate_in_sequence() {
        let mut conn = test_db();
        let first = create_entities(&mut conn, &[input("Tan", "person", &[])]).unwrap();
        let second = create_entities(&mut conn, &[input("Tan", "robot", &[])]).unwrap();

        assert!(first[0].success);
        assert!(!second[0].success);
        assert_eq!(second[0].kind, Some(FailureKind::Conflict));
        // conflict reports the existing id
        assert_eq!(second[0].id, first[0].id);
        assert!(second[0].reason.as_ref().unwrap().contains("already exists"));
    }

    #[test]
    fn test_create_duplicate_within_batch_continues() {
        let mut conn = test_db();
        let results = create_entities(
            &mut conn,
            &[
                input("Tan", "person", &[]),
                input("Tan", "person", &[]),
                input("Kiren", "person", &[]),
            ],
        )
        .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(results[1].kind, Some(FailureKind::Conflict));
        assert!(results[2].success);
        assert_eq!(all_entities(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let mut conn = test_db();
        let results =
            create_entities(&mut conn, &[input("tan", "person", &[]), input("Tan", "person", &[])])
                .unwrap();
        assert!(results.iter().all(|r| r.success));
    }

    #[test]
    fn test_empty_name_is_invalid() {
        let mut conn = test_db();
        let results = create_entities(&mut conn, &[input("  ", "person", &[])]).unwrap();
        assert_eq!(results[0].kind, Some(FailureKind::Invalid));
    }

    #[test]
    fn test_add_observations_dedups() {
        let mut conn = test_db();
        create_entities(&mut conn, &[input("A", "thing", &["y"])]).unwrap();

        let results = add_observations(
            &mut conn,
            &[ObservationAddition {
                entity_name: "A".into(),
                contents: vec!["x".into(), "x".into(), "y".into()],
            }],
        )
        .unwrap();

        assert!(results[0].success);
        assert_eq!(results[0].added.as_deref(), Some(&["x".to_string()][..]));

        let entity = get_entity_by_name(&conn, "A").unwrap().unwrap();
        let expected: BTreeSet<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
        assert_eq!(entity.observations, expected);
    }

    #[test]
    fn test_add_observations_missing_entity() {
        let mut conn = test_db();
        create_entities(&mut conn, &[input("A", "thing", &[])]).unwrap();

        let results = add_observations(
            &mut conn,
            &[
                ObservationAddition {
                    entity_name: "Ghost".into(),
                    contents: vec!["boo".into()],
                },
                ObservationAddition {
                    entity_name: "A".into(),
                    contents: vec!["real".into()],
                },
            ],
        )
        .unwrap();

        assert_eq!(results[0].kind, Some(FailureKind::NotFound));
        assert!(results[1].success);
    }

    #[test]
    fn test_add_observations_bumps_updated_at() {
        let mut conn = test_db();
        create_entities(&mut conn, &[input("A", "thing", &["y"])]).unwrap();
        let before = get_entity_by_name(&conn, "A").unwrap().unwrap().updated_at;

        std::thread::sleep(std::time::Duration::from_millis(5));
        add_observations(
            &mut conn,
            &[ObservationAddition {
                entity_name: "A".into(),
                contents: vec!["y".into()],
            }],
        )
        .unwrap();

        let after = get_entity_by_name(&conn, "A").unwrap().unwrap().updated_at;
        assert_ne!(before, after);
    }

    #[test]
    fn test_delete_observations_ignores_absent() {
        let mut conn = test_db();
        create_entities(&mut conn, &[input("A", "thing", &["x", "y"])]).unwrap();

        let results = delete_observations(
            &mut conn,
            &[ObservationDeletion {
                entity_name: "A".into(),
                observations: vec!["x".into(), "never there".into()],
            }],
        )
        .unwrap();

        assert!(results[0].success);
        assert_eq!(results[0].removed.as_deref(), Some(&["x".to_string()][..]));
        let entity = get_entity_by_name(&conn, "A").unwrap().unwrap();
        assert_eq!(entity.observations.len(), 1);
        assert!(entity.observations.contains("y"));
    }

    #[test]
    fn test_update_entity_patch() {
        let mut conn = test_db();
        let id = create_entities(&mut conn, &[input("A", "thing", &["x"])]).unwrap()[0]
            .id
            .clone()
            .unwrap();

        let entity = update_entity(
            &conn,
            &EntityPatch {
                id: id.clone(),
                entity_type: Some("person".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(entity.name, "A");
        assert_eq!(entity.entity_type, "person");
        assert!(entity.observations.contains("x"));
    }

    #[test]
    fn test_update_entity_rename_conflict() {
        let mut conn = test_db();
        let results =
            create_entities(&mut conn, &[input("A", "thing", &[]), input("B", "thing", &[])])
                .unwrap();
        let id_a = results[0].id.clone().unwrap();

        let err = update_entity(
            &conn,
            &EntityPatch {
                id: id_a,
                name: Some("B".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::Conflict { .. }));
    }

    #[test]
    fn test_update_entities_batch_reports_missing() {
        let mut conn = test_db();
        let results = update_entities(
            &mut conn,
            &[EntityPatch {
                id: "nonexistent-id".into(),
                ..Default::default()
            }],
        )
        .unwrap();
        assert_eq!(results[0].kind, Some(FailureKind::NotFound));
        assert_eq!(results[0].name, "nonexistent-id");
    }

    #[test]
    fn test_delete_entity_row_missing_is_error() {
        let mut conn = test_db();
        let err = delete_entity_row(&mut conn, "nonexistent-id").unwrap_err();
        assert!(matches!(err, GraphError::NotFound { .. }));
    }

    #[test]
    fn test_resolve_names_skips_unknown() {
        let mut conn = test_db();
        create_entities(&mut conn, &[input("A", "thing", &[])]).unwrap();

        let resolved = resolve_names(&conn, ["A", "A", "Ghost"]).unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains_key("A"));
    }

    #[test]
    fn test_merge_entities_creates_and_merges() {
        let mut conn = test_db();
        create_entities(&mut conn, &[input("Tan", "person", &["likes cheese"])]).unwrap();

        let merged = merge_entities(
            &mut conn,
            &[
                input("Tan", "person", &["likes cheese", "lives in Paris"]),
                input("Paris", "place", &[]),
            ],
            "journal-1",
        )
        .unwrap();

        assert!(!merged[0].created);
        assert_eq!(
            merged[0].result.added.as_deref(),
            Some(&["lives in Paris".to_string()][..])
        );
        assert!(merged[1].created);

        let tan = get_entity_by_name(&conn, "Tan").unwrap().unwrap();
        assert_eq!(tan.observations.len(), 2);
        assert!(tan.journal_refs.contains("journal-1"));
        let paris = get_entity_by_name(&conn, "Paris").unwrap().unwrap();
        assert!(paris.journal_refs.contains("journal-1"));
    }
}
