//! Saga journal for entity-delete cascades.
//!
//! A cascade spans several independent store calls. Before the first mutating
//! step a row is written to `pending_cascades`; after each step completes the
//! row's `last_step` advances; when the cascade finishes the row is removed.
//! Rows that survive a crash are picked up by the repair pass, which simply
//! reruns the cascade from the top (every step is idempotent).

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::error::{GraphError, Result};
use super::now;

/// Steps of the entity-delete cascade, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStep {
    /// Name resolved to an id.
    Resolved,
    /// Incident relations collected.
    Collected,
    /// Relation ids removed from the far endpoints' index entries.
    IndexDetached,
    /// The entity's own index entry removed.
    OwnEntryRemoved,
    /// Incident relations deleted.
    RelationsDeleted,
    /// Entity row deleted.
    EntityDeleted,
    /// Summary appended to the operation log.
    Logged,
}

impl CascadeStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Collected => "collected",
            Self::IndexDetached => "index_detached",
            Self::OwnEntryRemoved => "own_entry_removed",
            Self::RelationsDeleted => "relations_deleted",
            Self::EntityDeleted => "entity_deleted",
            Self::Logged => "logged",
        }
    }
}

impl std::fmt::Display for CascadeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CascadeStep {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "resolved" => Ok(Self::Resolved),
            "collected" => Ok(Self::Collected),
            "index_detached" => Ok(Self::IndexDetached),
            "own_entry_removed" => Ok(Self::OwnEntryRemoved),
            "relations_deleted" => Ok(Self::RelationsDeleted),
            "entity_deleted" => Ok(Self::EntityDeleted),
            "logged" => Ok(Self::Logged),
            _ => Err(format!("unknown cascade step: {s}")),
        }
    }
}

/// A cascade that started but has not finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingCascade {
    pub entity_name: String,
    pub entity_id: Option<String>,
    pub last_step: CascadeStep,
    pub started_at: String,
    pub updated_at: String,
}

/// What one run of the cascade did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub entity_name: String,
    /// `None` when the name did not resolve.
    pub entity_id: Option<String>,
    pub relations_removed: usize,
    pub index_entries_written: usize,
    pub index_entries_removed: usize,
    pub completed: Vec<CascadeStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<CascadeStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CascadeReport {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            ..Default::default()
        }
    }

    /// The entity was found and every step ran.
    pub fn is_complete(&self) -> bool {
        self.entity_id.is_some() && self.failed_at.is_none()
    }

    /// The name did not resolve; nothing was done.
    pub fn is_not_found(&self) -> bool {
        self.entity_id.is_none() && self.failed_at.is_none()
    }
}

/// Record the start of a cascade. Restarting an existing row resets its step.
pub fn begin(conn: &Connection, entity_name: &str, entity_id: &str) -> Result<()> {
    let ts = now();
    conn.execute(
        "INSERT INTO pending_cascades (entity_name, entity_id, last_step, started_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?4) \
         ON CONFLICT(entity_name) DO UPDATE SET entity_id = excluded.entity_id, \
         last_step = excluded.last_step, updated_at = excluded.updated_at",
        params![entity_name, entity_id, CascadeStep::Resolved.as_str(), ts],
    )?;
    Ok(())
}

pub fn advance(conn: &Connection, entity_name: &str, step: CascadeStep) -> Result<()> {
    conn.execute(
        "UPDATE pending_cascades SET last_step = ?1, updated_at = ?2 WHERE entity_name = ?3",
        params![step.as_str(), now(), entity_name],
    )?;
    Ok(())
}

/// Remove the journal row. No-op if there is none.
pub fn finish(conn: &Connection, entity_name: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM pending_cascades WHERE entity_name = ?1",
        params![entity_name],
    )?;
    Ok(())
}

/// Cascades left unfinished, oldest first.
pub fn pending(conn: &Connection) -> Result<Vec<PendingCascade>> {
    let mut stmt = conn.prepare(
        "SELECT entity_name, entity_id, last_step, started_at, updated_at \
         FROM pending_cascades ORDER BY started_at",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(entity_name, entity_id, step, started_at, updated_at)| {
            Ok(PendingCascade {
                entity_name,
                entity_id,
                last_step: step.parse().map_err(GraphError::Validation)?,
                started_at,
                updated_at,
            })
        })
        .collect()
}
