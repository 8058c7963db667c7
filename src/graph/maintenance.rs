//! Consistency verification.
//!
//! Checks the global invariants the coordinator is meant to uphold: every
//! relation endpoint resolves, and every knowledge index entry equals the set
//! derived from the relations table under the active policy. Read-only;
//! [`super::coordinator::Coordinator::repair`] acts on the findings.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::error::Result;
use super::index::{self, IndexPolicy};
use super::relations::all_relations;
use crate::db::migrations;

/// An index entry that differs from its derived set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexMismatch {
    pub entity_id: String,
    /// Relation ids the entry should hold but does not.
    pub missing: Vec<String>,
    /// Relation ids the entry holds but should not.
    pub extra: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    pub entities: u64,
    pub relations: u64,
    pub index_entries: u64,
    /// Relations with an endpoint that does not resolve.
    pub dangling_relations: Vec<String>,
    pub index_mismatches: Vec<IndexMismatch>,
    /// Index entries for entities that no longer exist.
    pub orphan_entries: Vec<String>,
    pub pending_cascades: u64,
    pub index_stale: bool,
}

impl ConsistencyReport {
    /// The index matches the relations table.
    pub fn index_in_sync(&self) -> bool {
        self.index_mismatches.is_empty() && self.orphan_entries.is_empty()
    }

    pub fn is_consistent(&self) -> bool {
        self.index_in_sync()
            && self.dangling_relations.is_empty()
            && self.pending_cascades == 0
            && !self.index_stale
    }
}

fn count(conn: &Connection, table: &str) -> Result<u64> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(n as u64)
}

/// Compare the stores against each other.
pub fn verify_consistency(conn: &Connection, policy: &IndexPolicy) -> Result<ConsistencyReport> {
    let mut stmt = conn.prepare(
        "SELECT id FROM relations \
         WHERE from_id NOT IN (SELECT id FROM entities) \
            OR to_id NOT IN (SELECT id FROM entities) \
         ORDER BY id",
    )?;
    let dangling_relations = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare("SELECT id FROM entities")?;
    let entity_ids: BTreeSet<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<_, _>>()?;

    let mut expected = policy.derive(&all_relations(conn)?);
    let mut index_mismatches = Vec::new();
    let mut orphan_entries = Vec::new();

    for entry in index::all_entries(conn)? {
        if !entity_ids.contains(&entry.entity_id) {
            orphan_entries.push(entry.entity_id);
            continue;
        }
        let want = expected.remove(&entry.entity_id).unwrap_or_default();
        if let Some(mismatch) = diff(&entry.entity_id, &want, &entry.relations) {
            index_mismatches.push(mismatch);
        }
    }
    // derived sets with no entry at all
    let absent: BTreeMap<String, BTreeSet<String>> = expected;
    for (entity_id, want) in absent {
        if let Some(mismatch) = diff(&entity_id, &want, &BTreeSet::new()) {
            index_mismatches.push(mismatch);
        }
    }

    let report = ConsistencyReport {
        entities: entity_ids.len() as u64,
        relations: count(conn, "relations")?,
        index_entries: count(conn, "knowledge")?,
        dangling_relations,
        index_mismatches,
        orphan_entries,
        pending_cascades: count(conn, "pending_cascades")?,
        index_stale: migrations::is_index_stale(conn)?,
    };

    if !report.is_consistent() {
        tracing::warn!(
            dangling = report.dangling_relations.len(),
            mismatches = report.index_mismatches.len(),
            orphans = report.orphan_entries.len(),
            pending = report.pending_cascades,
            stale = report.index_stale,
            "graph consistency check found problems"
        );
    }
    Ok(report)
}

fn diff(entity_id: &str, want: &BTreeSet<String>, have: &BTreeSet<String>) -> Option<IndexMismatch> {
    let missing: Vec<String> = want.difference(have).cloned().collect();
    let extra: Vec<String> = have.difference(want).cloned().collect();
    if missing.is_empty() && extra.is_empty() {
        return None;
    }
    Some(IndexMismatch {
        entity_id: entity_id.to_string(),
        missing,
        extra,
    })
}
