//! Read paths. These query the stores directly and never go through the
//! coordinator or the operation log.

use rusqlite::Connection;
use std::collections::BTreeSet;

use super::entities::{self, all_entities, entities_by_ids, resolve_names};
use super::error::{GraphError, Result};
use super::index;
use super::relations::{all_relations, relations_by_ids, relations_touching};
use super::types::{BriefEntity, Entity, GraphView, Relation};

/// The whole graph.
pub fn read_graph(conn: &Connection) -> Result<GraphView> {
    Ok(GraphView {
        entities: all_entities(conn)?,
        relations: all_relations(conn)?,
    })
}

/// Names and types of every entity.
pub fn brief_entities(conn: &Connection) -> Result<Vec<BriefEntity>> {
    entities::brief_entities(conn)
}

/// Case-insensitive substring search over entity name, type and
/// observations. Returns the matching entities plus every relation touching
/// at least one of them.
pub fn search(conn: &Connection, query: &str) -> Result<GraphView> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Err(GraphError::Validation("search query must not be empty".into()));
    }

    let matches: Vec<Entity> = all_entities(conn)?
        .into_iter()
        .filter(|e| entity_matches(e, &needle))
        .collect();
    let ids: BTreeSet<String> = matches.iter().map(|e| e.id.clone()).collect();

    Ok(GraphView {
        relations: relations_touching(conn, &ids)?,
        entities: matches,
    })
}

fn entity_matches(entity: &Entity, needle: &str) -> bool {
    entity.name.to_lowercase().contains(needle)
        || entity.entity_type.to_lowercase().contains(needle)
        || entity
            .observations
            .iter()
            .any(|o| o.to_lowercase().contains(needle))
}

/// The named entities and every relation incident to any of them. Unknown
/// names are skipped.
pub fn open_nodes<S: AsRef<str>>(conn: &Connection, names: &[S]) -> Result<GraphView> {
    let resolved = resolve_names(conn, names.iter().map(|n| n.as_ref()))?;
    let ids: BTreeSet<String> = resolved.into_values().collect();

    Ok(GraphView {
        entities: entities_by_ids(conn, ids.iter().map(String::as_str))?,
        relations: relations_touching(conn, &ids)?,
    })
}

/// One-hop neighbourhood of an entity, read through the knowledge index.
/// Returns `None` when the name does not resolve.
pub fn neighbors(conn: &Connection, name: &str) -> Result<Option<GraphView>> {
    let Some(entity) = entities::get_entity_by_name(conn, name)? else {
        return Ok(None);
    };
    let relation_ids = index::get_entry(conn, &entity.id)?
        .map(|entry| entry.relations)
        .unwrap_or_default();
    let relations: Vec<Relation> = relations_by_ids(conn, &relation_ids)?;

    let mut ids: BTreeSet<&str> = BTreeSet::new();
    ids.insert(entity.id.as_str());
    for r in &relations {
        ids.insert(r.from.as_str());
        ids.insert(r.to.as_str());
    }

    Ok(Some(GraphView {
        entities: entities_by_ids(conn, ids)?,
        relations,
    }))
}
