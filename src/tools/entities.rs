//! MCP entity and observation tool parameter definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use cairn::graph::types::{EntityInput, ObservationAddition, ObservationDeletion};

/// Parameters for the `create_entities` MCP tool.
///
/// Items whose name is already taken fail individually; the rest are created.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CreateEntitiesParams {
    #[schemars(description = "Entities to create. Names must be unique.")]
    pub entities: Vec<EntityInput>,
}

/// Parameters for the `delete_entities` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEntitiesParams {
    /// Names to delete. Their relations and index entries go with them.
    #[schemars(
        description = "Names of entities to delete. Relations touching them are deleted too."
    )]
    pub entity_names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AddObservationsParams {
    #[schemars(description = "Observations to add, grouped by entity name")]
    pub observations: Vec<ObservationAddition>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DeleteObservationsParams {
    #[schemars(description = "Observations to remove, grouped by entity name")]
    pub deletions: Vec<ObservationDeletion>,
}
