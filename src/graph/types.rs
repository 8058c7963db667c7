//! Core graph type definitions.
//!
//! Records ([`Entity`], [`Relation`], [`KnowledgeEntry`]), the batch inputs
//! accepted at the boundary, and the per-item results every batch call returns.
//! Wire names are camelCase to match the HTTP and tool surfaces.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::error::GraphError;

/// A named node in the graph, matching the `entities` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// UUID v7 primary key.
    pub id: String,
    /// Unique, case-sensitive display name.
    pub name: String,
    /// Free-form category such as `"person"` or `"food"`.
    pub entity_type: String,
    /// Facts recorded about the entity. A set: no duplicates, no meaningful order.
    pub observations: BTreeSet<String>,
    /// Opaque ids of the journals this entity was distilled from.
    pub journal_refs: BTreeSet<String>,
    /// RFC 3339 timestamp of the last mutation.
    pub updated_at: String,
}

/// A typed directed edge between two entities, matching the `relations` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub id: String,
    /// Source entity id.
    pub from: String,
    /// Target entity id.
    pub to: String,
    /// Active-voice label, e.g. `"works_at"`.
    pub relation_type: String,
    pub journal_refs: BTreeSet<String>,
}

/// Adjacency entry for one entity: the ids of the relations incident to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    pub entity_id: String,
    pub relations: BTreeSet<String>,
    pub updated_at: String,
}

/// Name and type only, for cheap listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BriefEntity {
    pub name: String,
    pub entity_type: String,
}

/// A subgraph: entities plus relations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphView {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

// ── Inputs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityInput {
    #[schemars(description = "Unique entity name (case-sensitive)")]
    pub name: String,
    #[schemars(description = "Entity category, e.g. 'person', 'place', 'project'")]
    pub entity_type: String,
    #[serde(default)]
    #[schemars(description = "Initial observations about the entity")]
    pub observations: Vec<String>,
    #[serde(default, alias = "journalIds")]
    #[schemars(description = "Ids of the journals this entity comes from")]
    pub journal_refs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservationAddition {
    #[schemars(description = "Name of the entity to add observations to")]
    pub entity_name: String,
    #[schemars(description = "Observations to add; existing ones are ignored")]
    pub contents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservationDeletion {
    #[schemars(description = "Name of the entity to remove observations from")]
    pub entity_name: String,
    #[schemars(description = "Observations to remove; absent ones are ignored")]
    pub observations: Vec<String>,
}

/// Partial update of one entity, addressed by id. `None` fields are left as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityPatch {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    /// Replaces the whole observation set.
    #[serde(default)]
    pub observations: Option<Vec<String>>,
    /// Replaces the whole journal reference set.
    #[serde(default)]
    pub journal_refs: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelationInput {
    #[schemars(description = "Name of the source entity")]
    pub from: String,
    #[schemars(description = "Name of the target entity")]
    pub to: String,
    #[schemars(description = "Relation label in active voice, e.g. 'works_at'")]
    pub relation_type: String,
    #[serde(default, alias = "journalIds")]
    pub journal_refs: Vec<String>,
}

/// Identifies an existing relation by entity names and type.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelationKey {
    #[schemars(description = "Name of the source entity")]
    pub from: String,
    #[schemars(description = "Name of the target entity")]
    pub to: String,
    #[schemars(description = "Relation label")]
    pub relation_type: String,
}

impl From<&RelationInput> for RelationKey {
    fn from(input: &RelationInput) -> Self {
        Self {
            from: input.from.clone(),
            to: input.to.clone(),
            relation_type: input.relation_type.clone(),
        }
    }
}

/// Entities and relations extracted from one journal.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DistillInput {
    #[schemars(description = "Opaque id of the source journal")]
    pub journal_id: String,
    #[serde(default)]
    pub entities: Vec<EntityInput>,
    #[serde(default)]
    pub relations: Vec<RelationInput>,
}

// ── Results ──────────────────────────────────────────────────────────

/// Why a batch item did not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A referenced entity or relation does not exist.
    NotFound,
    /// The name or relation tuple is already taken.
    Conflict,
    /// The item itself is malformed (e.g. empty name).
    Invalid,
    /// The item was valid but its all-or-nothing batch was not.
    Rejected,
    /// A delete cascade stopped partway. Retrying the delete is safe.
    Interrupted,
}

/// Per-item outcome of an entity or observation batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityResult {
    pub success: bool,
    pub name: String,
    /// Id of the affected entity, or of the conflicting one on a conflict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    /// Observations that were not already present (observation additions only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<Vec<String>>,
    /// Observations that were actually present and removed (observation deletions only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<Vec<String>>,
}

impl EntityResult {
    pub fn ok(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            success: true,
            name: name.into(),
            id: Some(id.into()),
            reason: None,
            kind: None,
            added: None,
            removed: None,
        }
    }

    pub fn failed(name: impl Into<String>, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            name: name.into(),
            id: None,
            reason: Some(reason.into()),
            kind: Some(kind),
            added: None,
            removed: None,
        }
    }

    /// Convert an item-level error into a failed result. Storage errors are
    /// handed back so the caller can abort the whole call.
    pub fn from_error(name: impl Into<String>, err: GraphError) -> Result<Self, GraphError> {
        let Some(kind) = err.failure_kind() else {
            return Err(err);
        };
        let mut result = Self::failed(name, kind, err.to_string());
        result.id = err.existing_id().map(str::to_string);
        Ok(result)
    }
}

/// Per-item outcome of a relation batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationResult {
    pub success: bool,
    pub from: String,
    pub to: String,
    pub relation_type: String,
    /// Id of the affected relation, or of the existing one on a conflict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl RelationResult {
    pub fn ok(key: &RelationKey, id: impl Into<String>) -> Self {
        Self {
            success: true,
            from: key.from.clone(),
            to: key.to.clone(),
            relation_type: key.relation_type.clone(),
            id: Some(id.into()),
            reason: None,
            kind: None,
        }
    }

    pub fn failed(key: &RelationKey, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            from: key.from.clone(),
            to: key.to.clone(),
            relation_type: key.relation_type.clone(),
            id: None,
            reason: Some(reason.into()),
            kind: Some(kind),
        }
    }

    pub fn from_error(key: &RelationKey, err: GraphError) -> Result<Self, GraphError> {
        let Some(kind) = err.failure_kind() else {
            return Err(err);
        };
        let mut result = Self::failed(key, kind, err.to_string());
        result.id = err.existing_id().map(str::to_string);
        Ok(result)
    }
}

/// Outcome of [`crate::graph::coordinator::Coordinator::distill`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistillReport {
    pub journal_id: String,
    pub entities_created: usize,
    pub entities_merged: usize,
    pub relations_created: usize,
    pub relations_linked: usize,
    pub entities: Vec<EntityResult>,
    pub relations: Vec<RelationResult>,
}
