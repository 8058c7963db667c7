//! Knowledge index — per-entity adjacency sets of incident relation ids.
//!
//! The index is derived data: for every entity E its entry must equal the set
//! of relation ids touching E (as source or target under
//! [`IndexEndpoints::Both`], as source only under [`IndexEndpoints::From`]).
//! [`attach`] and [`detach`] are pure set union/difference, so re-running
//! them with a batch that is already partly applied is harmless, and
//! [`rebuild_from_relations`] can always re-derive the whole index.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::error::Result;
use super::types::{KnowledgeEntry, Relation};
use super::{decode_set, encode_set, now};
use crate::db::migrations;

/// Which endpoints of a relation get an index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexEndpoints {
    /// Source and target: symmetric one-hop traversal.
    #[default]
    Both,
    /// Source only.
    From,
}

impl IndexEndpoints {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Both => "both",
            Self::From => "from",
        }
    }
}

impl std::fmt::Display for IndexEndpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IndexEndpoints {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "both" => Ok(Self::Both),
            "from" => Ok(Self::From),
            _ => Err(format!("unknown index endpoints: {s} (expected 'both' or 'from')")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexPolicy {
    pub endpoints: IndexEndpoints,
    /// Keep entries whose relation set became empty.
    pub keep_empty_entries: bool,
}

impl IndexPolicy {
    /// Entity ids under which `relation` is indexed.
    pub fn endpoints_of<'a>(&self, relation: &'a Relation) -> Vec<&'a str> {
        match self.endpoints {
            IndexEndpoints::Both if relation.from != relation.to => {
                vec![relation.from.as_str(), relation.to.as_str()]
            }
            _ => vec![relation.from.as_str()],
        }
    }

    /// What the index should contain for this set of relations.
    pub fn derive(&self, relations: &[Relation]) -> BTreeMap<String, BTreeSet<String>> {
        let mut expected: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for relation in relations {
            for entity_id in self.endpoints_of(relation) {
                expected
                    .entry(entity_id.to_string())
                    .or_default()
                    .insert(relation.id.clone());
            }
        }
        expected
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexChange {
    /// Entries inserted or rewritten.
    pub entries_written: usize,
    /// Entries deleted because their set became empty.
    pub entries_removed: usize,
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<KnowledgeEntry> {
    Ok(KnowledgeEntry {
        entity_id: row.get(0)?,
        relations: decode_set(row, 1)?,
        updated_at: row.get(2)?,
    })
}

pub fn get_entry(conn: &Connection, entity_id: &str) -> Result<Option<KnowledgeEntry>> {
    Ok(conn
        .query_row(
            "SELECT entity_id, relations, updated_at FROM knowledge WHERE entity_id = ?1",
            params![entity_id],
            entry_from_row,
        )
        .optional()?)
}

pub fn all_entries(conn: &Connection) -> Result<Vec<KnowledgeEntry>> {
    let mut stmt =
        conn.prepare("SELECT entity_id, relations, updated_at FROM knowledge ORDER BY entity_id")?;
    let entries = stmt
        .query_map([], entry_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

fn write_entry(conn: &Connection, entity_id: &str, relations: &BTreeSet<String>) -> Result<()> {
    conn.execute(
        "INSERT INTO knowledge (entity_id, relations, updated_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(entity_id) DO UPDATE SET relations = excluded.relations, updated_at = excluded.updated_at",
        params![entity_id, encode_set(relations)?, now()],
    )?;
    Ok(())
}

fn delete_entry(conn: &Connection, entity_id: &str) -> Result<bool> {
    let rows = conn.execute("DELETE FROM knowledge WHERE entity_id = ?1", params![entity_id])?;
    Ok(rows > 0)
}

/// Union relation ids into the entries of every endpoint they touch,
/// creating entries as needed.
pub fn attach(conn: &mut Connection, policy: &IndexPolicy, relations: &[Relation]) -> Result<IndexChange> {
    let tx = conn.transaction()?;
    let mut change = IndexChange::default();

    for (entity_id, ids) in policy.derive(relations) {
        let mut current = get_entry(&tx, &entity_id)?
            .map(|e| e.relations)
            .unwrap_or_default();
        let before = current.len();
        current.extend(ids);
        if current.len() != before {
            write_entry(&tx, &entity_id, &current)?;
            change.entries_written += 1;
        }
    }

    tx.commit()?;
    Ok(change)
}

/// Subtract relation ids from the entries of every endpoint they touch.
/// Entities without an entry are skipped.
pub fn detach(conn: &mut Connection, policy: &IndexPolicy, relations: &[Relation]) -> Result<IndexChange> {
    let tx = conn.transaction()?;
    let mut change = IndexChange::default();

    for (entity_id, ids) in policy.derive(relations) {
        let Some(entry) = get_entry(&tx, &entity_id)? else {
            continue;
        };
        let remaining: BTreeSet<String> = entry.relations.difference(&ids).cloned().collect();

        if remaining.is_empty() && !policy.keep_empty_entries {
            delete_entry(&tx, &entity_id)?;
            change.entries_removed += 1;
        } else if remaining.len() != entry.relations.len() {
            write_entry(&tx, &entity_id, &remaining)?;
            change.entries_written += 1;
        }
    }

    tx.commit()?;
    Ok(change)
}

/// Drop an entity's own entry. Returns `false` if there was none.
pub fn remove_entry(conn: &mut Connection, entity_id: &str) -> Result<bool> {
    let tx = conn.transaction()?;
    let removed = delete_entry(&tx, entity_id)?;
    tx.commit()?;
    Ok(removed)
}

/// Re-derive the whole index from the relations table in one transaction,
/// then record the policy and clear the stale flag.
pub fn rebuild_from_relations(conn: &mut Connection, policy: &IndexPolicy) -> Result<IndexChange> {
    let tx = conn.transaction()?;
    let relations = super::relations::all_relations(&tx)?;
    let expected = policy.derive(&relations);
    let mut change = IndexChange::default();

    for entry in all_entries(&tx)? {
        if expected.contains_key(&entry.entity_id) {
            continue;
        }
        let entity_exists = super::entities::get_entity(&tx, &entry.entity_id)?.is_some();
        if policy.keep_empty_entries && entity_exists {
            if !entry.relations.is_empty() {
                write_entry(&tx, &entry.entity_id, &BTreeSet::new())?;
                change.entries_written += 1;
            }
        } else {
            delete_entry(&tx, &entry.entity_id)?;
            change.entries_removed += 1;
        }
    }

    for (entity_id, ids) in &expected {
        let current = get_entry(&tx, entity_id)?.map(|e| e.relations);
        if current.as_ref() != Some(ids) {
            write_entry(&tx, entity_id, ids)?;
            change.entries_written += 1;
        }
    }

    migrations::set_index_endpoints(&tx, policy.endpoints.as_str())?;
    migrations::set_index_stale(&tx, false)?;
    tx.commit()?;

    tracing::info!(
        relations = relations.len(),
        written = change.entries_written,
        removed = change.entries_removed,
        "knowledge index rebuilt"
    );
    Ok(change)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn relation(id: &str, from: &str, to: &str) -> Relation {
        Relation {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            relation_type: "knows".into(),
            journal_refs: BTreeSet::new(),
        }
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn relations_of(conn: &Connection, entity_id: &str) -> Option<BTreeSet<String>> {
        get_entry(conn, entity_id).unwrap().map(|e| e.relations)
    }

    #[test]
    fn attach_indexes_both_endpoints() {
        let mut conn = db::open_memory_database().unwrap();
        let policy = IndexPolicy::default();

        attach(&mut conn, &policy, &[relation("r1", "a", "b"), relation("r2", "b", "c")]).unwrap();

        assert_eq!(relations_of(&conn, "a"), Some(set(&["r1"])));
        assert_eq!(relations_of(&conn, "b"), Some(set(&["r1", "r2"])));
        assert_eq!(relations_of(&conn, "c"), Some(set(&["r2"])));
    }

    #[test]
    fn attach_from_only() {
        let mut conn = db::open_memory_database().unwrap();
        let policy = IndexPolicy {
            endpoints: IndexEndpoints::From,
            keep_empty_entries: false,
        };

        attach(&mut conn, &policy, &[relation("r1", "a", "b")]).unwrap();

        assert_eq!(relations_of(&conn, "a"), Some(set(&["r1"])));
        assert_eq!(relations_of(&conn, "b"), None);
    }

    #[test]
    fn attach_is_idempotent() {
        let mut conn = db::open_memory_database().unwrap();
        let policy = IndexPolicy::default();
        let batch = [relation("r1", "a", "b"), relation("r2", "a", "c")];

        attach(&mut conn, &policy, &batch[..1]).unwrap();
        let change = attach(&mut conn, &policy, &batch).unwrap();
        // only a's set grew and c is new; b already had r1
        assert_eq!(change.entries_written, 2);
        let again = attach(&mut conn, &policy, &batch).unwrap();
        assert_eq!(again.entries_written, 0);

        assert_eq!(relations_of(&conn, "a"), Some(set(&["r1", "r2"])));
    }

    #[test]
    fn detach_removes_empty_entries() {
        let mut conn = db::open_memory_database().unwrap();
        let policy = IndexPolicy::default();
        let r1 = relation("r1", "a", "b");
        let r2 = relation("r2", "b", "c");
        attach(&mut conn, &policy, &[r1.clone(), r2.clone()]).unwrap();

        let change = detach(&mut conn, &policy, &[r1.clone()]).unwrap();
        assert_eq!(change.entries_removed, 1);
        assert_eq!(relations_of(&conn, "a"), None);
        assert_eq!(relations_of(&conn, "b"), Some(set(&["r2"])));

        // second detach of the same relation changes nothing
        let again = detach(&mut conn, &policy, &[r1]).unwrap();
        assert_eq!(again, IndexChange::default());
    }

    #[test]
    fn detach_keeps_empty_entries_when_configured() {
        let mut conn = db::open_memory_database().unwrap();
        let policy = IndexPolicy {
            endpoints: IndexEndpoints::Both,
            keep_empty_entries: true,
        };
        let r1 = relation("r1", "a", "b");
        attach(&mut conn, &policy, &[r1.clone()]).unwrap();

        detach(&mut conn, &policy, &[r1]).unwrap();
        assert_eq!(relations_of(&conn, "a"), Some(BTreeSet::new()));
    }

    #[test]
    fn self_loop_is_indexed_once() {
        let policy = IndexPolicy::default();
        let derived = policy.derive(&[relation("r1", "a", "a")]);
        assert_eq!(derived.len(), 1);
        assert_eq!(derived["a"], set(&["r1"]));
    }

    #[test]
    fn remove_entry_reports_absence() {
        let mut conn = db::open_memory_database().unwrap();
        let policy = IndexPolicy::default();
        attach(&mut conn, &policy, &[relation("r1", "a", "b")]).unwrap();

        assert!(remove_entry(&mut conn, "a").unwrap());
        assert!(!remove_entry(&mut conn, "a").unwrap());
    }
}
