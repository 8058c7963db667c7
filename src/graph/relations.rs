//! Relation store — typed directed edges between entities.
//!
//! Edges are addressed at the boundary by entity *names*; names are resolved to
//! ids once per distinct name per call. The `(from_id, to_id, relation_type)`
//! tuple is unique (enforced by a compound index), and a second relation with
//! the same tuple is rejected rather than merged.
//!
//! Creation is all-or-nothing: if any item in the batch is invalid, nothing is
//! written and every item comes back as a failure.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::entities::resolve_names;
use super::error::{GraphError, Result};
use super::types::{FailureKind, Relation, RelationInput, RelationKey, RelationResult};
use super::{decode_set, encode_set, now};

const RELATION_COLUMNS: &str = "id, from_id, to_id, relation_type, journal_refs";

fn relation_from_row(row: &Row<'_>) -> rusqlite::Result<Relation> {
    Ok(Relation {
        id: row.get(0)?,
        from: row.get(1)?,
        to: row.get(2)?,
        relation_type: row.get(3)?,
        journal_refs: decode_set(row, 4)?,
    })
}

/// Result of [`create_relations`]: per-item results plus the relations that
/// were actually written (empty when the batch was rejected).
#[derive(Debug, Default)]
pub struct CreatedRelations {
    pub results: Vec<RelationResult>,
    pub created: Vec<Relation>,
}

/// Validate and insert a batch of relations, all-or-nothing.
pub fn create_relations(conn: &mut Connection, items: &[RelationInput]) -> Result<CreatedRelations> {
    let tx = conn.transaction()?;
    let ids = resolve_names(
        &tx,
        items.iter().flat_map(|i| [i.from.as_str(), i.to.as_str()]),
    )?;

    // First pass: validate every item without writing anything.
    let mut failures: Vec<Option<RelationResult>> = Vec::with_capacity(items.len());
    let mut seen: HashMap<(&str, &str, &str), usize> = HashMap::new();

    for (position, item) in items.iter().enumerate() {
        let key = RelationKey::from(item);
        let failure = match validate_item(&tx, item, &ids) {
            Err(e) => Some(RelationResult::from_error(&key, e)?),
            Ok((from_id, to_id)) => {
                match seen.insert((from_id, to_id, item.relation_type.as_str()), position) {
                    Some(first) => Some(RelationResult::failed(
                        &key,
                        FailureKind::Conflict,
                        format!("relation repeated in batch (same as item {first})"),
                    )),
                    None => None,
                }
            }
        };
        failures.push(failure);
    }

    let invalid = failures.iter().filter(|f| f.is_some()).count();
    if invalid > 0 {
        tracing::debug!(invalid, total = items.len(), "relation batch rejected");
        let results = items
            .iter()
            .zip(failures)
            .map(|(item, failure)| {
                failure.unwrap_or_else(|| {
                    RelationResult::failed(
                        &RelationKey::from(item),
                        FailureKind::Rejected,
                        format!("batch rejected: {invalid} invalid relation(s)"),
                    )
                })
            })
            .collect();
        return Ok(CreatedRelations {
            results,
            created: Vec::new(),
        });
    }

    // Second pass: insert.
    let mut results = Vec::with_capacity(items.len());
    let mut created = Vec::with_capacity(items.len());
    for item in items {
        let relation = Relation {
            id: uuid::Uuid::now_v7().to_string(),
            from: ids[&item.from].clone(),
            to: ids[&item.to].clone(),
            relation_type: item.relation_type.clone(),
            journal_refs: item.journal_refs.iter().cloned().collect(),
        };
        tx.execute(
            "INSERT INTO relations (id, from_id, to_id, relation_type, journal_refs, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                relation.id,
                relation.from,
                relation.to,
                relation.relation_type,
                encode_set(&relation.journal_refs)?,
                now(),
            ],
        )?;
        results.push(RelationResult::ok(&RelationKey::from(item), &relation.id));
        created.push(relation);
    }

    tx.commit()?;
    Ok(CreatedRelations { results, created })
}

/// Check one item against the resolved ids and the existing tuples.
fn validate_item<'a>(
    conn: &Connection,
    item: &RelationInput,
    ids: &'a HashMap<String, String>,
) -> Result<(&'a str, &'a str)> {
    if item.relation_type.trim().is_empty() {
        return Err(GraphError::Validation("relation type must not be empty".into()));
    }
    let from_id = ids
        .get(&item.from)
        .ok_or_else(|| GraphError::not_found("from entity", &item.from))?;
    let to_id = ids
        .get(&item.to)
        .ok_or_else(|| GraphError::not_found("to entity", &item.to))?;

    if let Some(existing) = find_relation(conn, from_id, to_id, &item.relation_type)? {
        return Err(GraphError::Conflict {
            what: "relation",
            key: describe(&RelationKey::from(item)),
            existing_id: existing.id,
        });
    }
    Ok((from_id, to_id))
}

fn describe(key: &RelationKey) -> String {
    format!("{} -{}-> {}", key.from, key.relation_type, key.to)
}

/// Result of [`match_relations`]: per-item results plus the distinct
/// relations that matched.
#[derive(Debug, Default)]
pub struct MatchedRelations {
    pub results: Vec<RelationResult>,
    pub matched: Vec<Relation>,
}

/// Look up relations by `(from name, to name, type)`. Keys that do not resolve
/// are reported as not found. The same relation named twice is returned once.
pub fn match_relations(conn: &Connection, keys: &[RelationKey]) -> Result<MatchedRelations> {
    let ids = resolve_names(conn, keys.iter().flat_map(|k| [k.from.as_str(), k.to.as_str()]))?;
    let mut results = Vec::with_capacity(keys.len());
    let mut matched: BTreeMap<String, Relation> = BTreeMap::new();

    for key in keys {
        let found = match (ids.get(&key.from), ids.get(&key.to)) {
            (Some(from_id), Some(to_id)) => find_relation(conn, from_id, to_id, &key.relation_type)?,
            _ => None,
        };
        match found {
            Some(relation) => {
                results.push(RelationResult::ok(key, &relation.id));
                matched.entry(relation.id.clone()).or_insert(relation);
            }
            None => results.push(RelationResult::from_error(
                key,
                GraphError::not_found("relation", describe(key)),
            )?),
        }
    }

    Ok(MatchedRelations {
        results,
        matched: matched.into_values().collect(),
    })
}

/// Exact tuple lookup via the compound index.
pub fn find_relation(
    conn: &Connection,
    from_id: &str,
    to_id: &str,
    relation_type: &str,
) -> Result<Option<Relation>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {RELATION_COLUMNS} FROM relations \
                 WHERE from_id = ?1 AND to_id = ?2 AND relation_type = ?3"
            ),
            params![from_id, to_id, relation_type],
            relation_from_row,
        )
        .optional()?)
}

/// Every relation where the entity is source or target, deduplicated by id.
pub fn relations_incident_to(conn: &Connection, entity_id: &str) -> Result<Vec<Relation>> {
    let mut incident: BTreeMap<String, Relation> = BTreeMap::new();
    for column in ["from_id", "to_id"] {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {RELATION_COLUMNS} FROM relations WHERE {column} = ?1"
        ))?;
        let rows = stmt
            .query_map(params![entity_id], relation_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for relation in rows {
            incident.entry(relation.id.clone()).or_insert(relation);
        }
    }
    Ok(incident.into_values().collect())
}

/// Relations incident to any of the given entity ids, deduplicated.
pub fn relations_touching(conn: &Connection, entity_ids: &BTreeSet<String>) -> Result<Vec<Relation>> {
    let mut touching: BTreeMap<String, Relation> = BTreeMap::new();
    for id in entity_ids {
        for relation in relations_incident_to(conn, id)? {
            touching.entry(relation.id.clone()).or_insert(relation);
        }
    }
    Ok(touching.into_values().collect())
}

/// Relations with the given ids. Unknown ids are skipped.
pub fn relations_by_ids<'a>(
    conn: &Connection,
    ids: impl IntoIterator<Item = &'a String>,
) -> Result<Vec<Relation>> {
    let mut stmt =
        conn.prepare_cached(&format!("SELECT {RELATION_COLUMNS} FROM relations WHERE id = ?1"))?;
    let mut relations = Vec::new();
    for id in ids {
        if let Some(relation) = stmt.query_row(params![id], relation_from_row).optional()? {
            relations.push(relation);
        }
    }
    Ok(relations)
}

pub fn all_relations(conn: &Connection) -> Result<Vec<Relation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RELATION_COLUMNS} FROM relations ORDER BY created_at, id"
    ))?;
    let relations = stmt
        .query_map([], relation_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(relations)
}

/// Delete relation rows by id. Already-deleted ids are ignored. Returns the
/// number of rows removed.
pub fn delete_relation_rows(conn: &mut Connection, ids: &[String]) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut removed = 0;
    {
        let mut stmt = tx.prepare_cached("DELETE FROM relations WHERE id = ?1")?;
        for id in ids {
            removed += stmt.execute(params![id])?;
        }
    }
    tx.commit()?;
    Ok(removed)
}

/// Add a journal reference to existing relations.
pub fn add_journal_ref(conn: &mut Connection, relation_ids: &[String], journal_id: &str) -> Result<()> {
    let tx = conn.transaction()?;
    for relation in relations_by_ids(&tx, relation_ids)? {
        let mut refs = relation.journal_refs;
        if refs.insert(journal_id.to_string()) {
            tx.execute(
                "UPDATE relations SET journal_refs = ?1 WHERE id = ?2",
                params![encode_set(&refs)?, relation.id],
            )?;
        }
    }
    tx.commit()?;
    Ok(())
}
