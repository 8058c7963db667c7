//! MCP relation tool parameter definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use cairn::graph::types::{RelationInput, RelationKey};

/// Parameters for the `create_relations` MCP tool.
///
/// All-or-nothing: one invalid relation rejects the whole batch.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CreateRelationsParams {
    #[schemars(
        description = "Relations to create between existing entities. If any is invalid, none are created."
    )]
    pub relations: Vec<RelationInput>,
}

/// Parameters for the `delete_relations` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DeleteRelationsParams {
    #[schemars(description = "Relations to delete, identified by from, to and relationType")]
    pub relations: Vec<RelationKey>,
}
