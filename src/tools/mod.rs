pub mod entities;
pub mod graph;
pub mod relations;

use entities::{
    AddObservationsParams, CreateEntitiesParams, DeleteEntitiesParams, DeleteObservationsParams,
};
use graph::{NoParams, OpenNodesParams, SearchNodesParams};
use relations::{CreateRelationsParams, DeleteRelationsParams};
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use serde::Serialize;
use std::sync::Arc;

use cairn::graph::coordinator::Coordinator;
use cairn::graph::read;

/// The cairn MCP tool handler. Every tool runs its SQLite work on the
/// blocking pool and answers with the same JSON shapes as the HTTP API.
#[derive(Clone)]
pub struct CairnTools {
    tool_router: ToolRouter<Self>,
    coordinator: Arc<Coordinator>,
}

impl CairnTools {
    async fn run<T, F>(&self, f: F) -> Result<String, String>
    where
        T: Serialize + Send + 'static,
        F: FnOnce(&Coordinator) -> cairn::graph::error::Result<T> + Send + 'static,
    {
        let coordinator = Arc::clone(&self.coordinator);
        let result = tokio::task::spawn_blocking(move || f(&coordinator))
            .await
            .map_err(|e| format!("db task failed: {e}"))?
            .map_err(|e| e.to_string())?;
        serde_json::to_string(&result).map_err(|e| format!("serialization failed: {e}"))
    }
}

#[tool_router]
impl CairnTools {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            coordinator,
        }
    }

    /// List every entity by name and type.
    #[tool(description = "List all entities in the knowledge graph (name and entityType only).")]
    async fn get_entities(
        &self,
        Parameters(_params): Parameters<NoParams>,
    ) -> Result<String, String> {
        tracing::info!("get_entities called");
        self.run(|c| c.with_conn(|conn| read::brief_entities(conn)))
            .await
    }

    /// Dump the whole graph.
    #[tool(description = "Return the full knowledge graph: all entities with observations and all relations.")]
    async fn view_graph(
        &self,
        Parameters(_params): Parameters<NoParams>,
    ) -> Result<String, String> {
        tracing::info!("view_graph called");
        self.run(|c| c.with_conn(|conn| read::read_graph(conn)))
            .await
    }

    #[tool(description = "Search entities by a case-insensitive substring of their name, type or observations. Also returns relations touching the matches.")]
    async fn search_nodes(
        &self,
        Parameters(params): Parameters<SearchNodesParams>,
    ) -> Result<String, String> {
        tracing::info!(query = %params.query, "search_nodes called");
        self.run(move |c| c.with_conn(|conn| read::search(conn, &params.query)))
            .await
    }

    #[tool(description = "Open specific entities by name, with every relation touching them.")]
    async fn open_nodes(
        &self,
        Parameters(params): Parameters<OpenNodesParams>,
    ) -> Result<String, String> {
        tracing::info!(count = params.names.len(), "open_nodes called");
        self.run(move |c| c.with_conn(|conn| read::open_nodes(conn, &params.names)))
            .await
    }

    /// Create entities; duplicates fail per item.
    #[tool(description = "Create entities (name, entityType, observations). An item whose name already exists fails on its own; the others are still created.")]
    async fn create_entities(
        &self,
        Parameters(params): Parameters<CreateEntitiesParams>,
    ) -> Result<String, String> {
        tracing::info!(count = params.entities.len(), "create_entities called");
        self.run(move |c| c.create_entities(&params.entities)).await
    }

    #[tool(description = "Delete entities by name. Relations touching them are deleted as well.")]
    async fn delete_entities(
        &self,
        Parameters(params): Parameters<DeleteEntitiesParams>,
    ) -> Result<String, String> {
        tracing::info!(count = params.entity_names.len(), "delete_entities called");
        self.run(move |c| c.delete_entities(&params.entity_names))
            .await
    }

    #[tool(description = "Add observations to existing entities. Observations already present are skipped; the result lists the ones actually added.")]
    async fn add_observations(
        &self,
        Parameters(params): Parameters<AddObservationsParams>,
    ) -> Result<String, String> {
        tracing::info!(count = params.observations.len(), "add_observations called");
        self.run(move |c| c.add_observations(&params.observations))
            .await
    }

    #[tool(description = "Remove observations from entities. Observations that are not present are ignored.")]
    async fn delete_observations(
        &self,
        Parameters(params): Parameters<DeleteObservationsParams>,
    ) -> Result<String, String> {
        tracing::info!(count = params.deletions.len(), "delete_observations called");
        self.run(move |c| c.delete_observations(&params.deletions))
            .await
    }

    /// All-or-nothing relation creation.
    #[tool(description = "Create relations between existing entities, in active voice (e.g. 'works_at'). If any relation is invalid or already exists, none are created.")]
    async fn create_relations(
        &self,
        Parameters(params): Parameters<CreateRelationsParams>,
    ) -> Result<String, String> {
        tracing::info!(count = params.relations.len(), "create_relations called");
        self.run(move |c| c.create_relations(&params.relations))
            .await
    }

    #[tool(description = "Delete relations identified by from, to and relationType.")]
    async fn delete_relations(
        &self,
        Parameters(params): Parameters<DeleteRelationsParams>,
    ) -> Result<String, String> {
        tracing::info!(count = params.relations.len(), "delete_relations called");
        self.run(move |c| c.delete_relations(&params.relations))
            .await
    }
}

#[tool_handler]
impl ServerHandler for CairnTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Cairn is a personal knowledge graph. Use get_entities or search_nodes to look \
                 around, open_nodes for details, and the create/delete tools to record what \
                 you learn."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
