//! MCP read tool parameter definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `get_entities` and `view_graph` MCP tools. Both take no
/// arguments.
#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct NoParams {}

/// Parameters for the `search_nodes` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchNodesParams {
    /// Case-insensitive substring.
    #[schemars(
        description = "Text to look for in entity names, types and observations (case-insensitive)"
    )]
    pub query: String,
}

/// Parameters for the `open_nodes` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct OpenNodesParams {
    #[schemars(description = "Entity names to open, with the relations touching them")]
    pub names: Vec<String>,
}
