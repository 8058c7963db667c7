//! HTTP surface over the coordinator and read paths.
//!
//! Every handler moves its SQLite work onto the blocking pool. Malformed
//! requests get `400 {"error": ...}`; storage failures are logged and answered
//! with a generic `500` so internals never leak to the client.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::db::{self, HealthReport};
use crate::graph::coordinator::{Coordinator, RepairReport};
use crate::graph::error::GraphError;
use crate::graph::read;
use crate::graph::types::{
    BriefEntity, DistillInput, DistillReport, EntityInput, EntityPatch, EntityResult, GraphView,
    ObservationAddition, ObservationDeletion, RelationInput, RelationKey, RelationResult,
};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

/// Build the router with all routes and request tracing.
pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route(
            "/entities",
            get(list_entities)
                .post(create_entities)
                .delete(delete_entities)
                .patch(update_entities),
        )
        .route("/relations", post(create_relations).delete(delete_relations))
        .route(
            "/observations",
            post(add_observations).delete(delete_observations),
        )
        .route("/distill", post(distill))
        .route("/graph", get(read_graph))
        .route("/search", get(search))
        .route("/nodes", get(open_nodes))
        .route("/neighbors", get(neighbors))
        .route("/maintenance/repair", post(repair))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { coordinator })
}

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<GraphError> for ApiError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Validation(_) => Self::BadRequest(err.to_string()),
            GraphError::NotFound { .. } => Self::NotFound(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run a coordinator call on the blocking pool.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Coordinator) -> crate::graph::error::Result<T> + Send + 'static,
{
    let coordinator = Arc::clone(&state.coordinator);
    tokio::task::spawn_blocking(move || f(&coordinator))
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
        .map_err(ApiError::from)
}

/// Run a read path under the connection lock on the blocking pool.
async fn read_with<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> crate::graph::error::Result<T> + Send + 'static,
{
    blocking(state, move |coordinator| coordinator.with_conn(|conn| f(conn))).await
}

// ── Request bodies ───────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateEntitiesBody {
    pub entities: Vec<EntityInput>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEntitiesBody {
    pub entity_names: Vec<String>,
}

#[derive(Deserialize)]
pub struct UpdateEntitiesBody {
    pub updates: Vec<EntityPatch>,
}

#[derive(Deserialize)]
pub struct CreateRelationsBody {
    pub relations: Vec<RelationInput>,
}

#[derive(Deserialize)]
pub struct DeleteRelationsBody {
    pub relations: Vec<RelationKey>,
}

#[derive(Deserialize)]
pub struct AddObservationsBody {
    pub observations: Vec<ObservationAddition>,
}

#[derive(Deserialize)]
pub struct DeleteObservationsBody {
    pub deletions: Vec<ObservationDeletion>,
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
}

#[derive(Deserialize)]
pub struct NodesParams {
    /// Comma-separated entity names.
    pub names: Option<String>,
}

#[derive(Deserialize)]
pub struct NeighborsParams {
    pub name: Option<String>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn list_entities(State(state): State<AppState>) -> ApiResult<Vec<BriefEntity>> {
    read_with(&state, read::brief_entities).await.map(Json)
}

async fn create_entities(
    State(state): State<AppState>,
    body: Result<Json<CreateEntitiesBody>, JsonRejection>,
) -> ApiResult<Vec<EntityResult>> {
    let Json(body) = body?;
    blocking(&state, move |c| c.create_entities(&body.entities))
        .await
        .map(Json)
}

async fn delete_entities(
    State(state): State<AppState>,
    body: Result<Json<DeleteEntitiesBody>, JsonRejection>,
) -> ApiResult<Vec<EntityResult>> {
    let Json(body) = body?;
    blocking(&state, move |c| c.delete_entities(&body.entity_names))
        .await
        .map(Json)
}

async fn update_entities(
    State(state): State<AppState>,
    body: Result<Json<UpdateEntitiesBody>, JsonRejection>,
) -> ApiResult<Vec<EntityResult>> {
    let Json(body) = body?;
    blocking(&state, move |c| c.update_entities(&body.updates))
        .await
        .map(Json)
}

async fn create_relations(
    State(state): State<AppState>,
    body: Result<Json<CreateRelationsBody>, JsonRejection>,
) -> ApiResult<Vec<RelationResult>> {
    let Json(body) = body?;
    blocking(&state, move |c| c.create_relations(&body.relations))
        .await
        .map(Json)
}

async fn delete_relations(
    State(state): State<AppState>,
    body: Result<Json<DeleteRelationsBody>, JsonRejection>,
) -> ApiResult<Vec<RelationResult>> {
    let Json(body) = body?;
    blocking(&state, move |c| c.delete_relations(&body.relations))
        .await
        .map(Json)
}

async fn add_observations(
    State(state): State<AppState>,
    body: Result<Json<AddObservationsBody>, JsonRejection>,
) -> ApiResult<Vec<EntityResult>> {
    let Json(body) = body?;
    blocking(&state, move |c| c.add_observations(&body.observations))
        .await
        .map(Json)
}

async fn delete_observations(
    State(state): State<AppState>,
    body: Result<Json<DeleteObservationsBody>, JsonRejection>,
) -> ApiResult<Vec<EntityResult>> {
    let Json(body) = body?;
    blocking(&state, move |c| c.delete_observations(&body.deletions))
        .await
        .map(Json)
}

async fn distill(
    State(state): State<AppState>,
    body: Result<Json<DistillInput>, JsonRejection>,
) -> ApiResult<DistillReport> {
    let Json(input) = body?;
    blocking(&state, move |c| c.distill(&input)).await.map(Json)
}

async fn read_graph(State(state): State<AppState>) -> ApiResult<GraphView> {
    read_with(&state, read::read_graph).await.map(Json)
}

async fn search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> ApiResult<GraphView> {
    let Query(params) = params?;
    let Some(q) = params.q else {
        return Err(ApiError::BadRequest("missing query parameter 'q'".into()));
    };
    read_with(&state, move |conn| read::search(conn, &q))
        .await
        .map(Json)
}

async fn open_nodes(
    State(state): State<AppState>,
    params: Result<Query<NodesParams>, QueryRejection>,
) -> ApiResult<GraphView> {
    let Query(params) = params?;
    let names: Vec<String> = params
        .names
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err(ApiError::BadRequest("missing query parameter 'names'".into()));
    }
    read_with(&state, move |conn| read::open_nodes(conn, &names))
        .await
        .map(Json)
}

async fn neighbors(
    State(state): State<AppState>,
    params: Result<Query<NeighborsParams>, QueryRejection>,
) -> ApiResult<GraphView> {
    let Query(params) = params?;
    let Some(name) = params.name.filter(|n| !n.trim().is_empty()) else {
        return Err(ApiError::BadRequest("missing query parameter 'name'".into()));
    };
    let lookup = name.clone();
    read_with(&state, move |conn| read::neighbors(conn, &lookup))
        .await?
        .map(Json)
        .ok_or_else(|| GraphError::not_found("entity", name).into())
}

async fn repair(State(state): State<AppState>) -> ApiResult<RepairReport> {
    blocking(&state, |c| c.repair()).await.map(Json)
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    #[serde(flatten)]
    report: HealthReport,
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthBody>, ApiError> {
    let coordinator = Arc::clone(&state.coordinator);
    let report = tokio::task::spawn_blocking(move || {
        let conn = coordinator
            .db()
            .lock()
            .map_err(|_| anyhow::anyhow!("db lock poisoned"))?;
        db::check_database_health(&conn)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
    .map_err(|e| ApiError::Internal(format!("{e:#}")))?;

    let status = if report.integrity_ok && !report.index_stale && report.pending_cascades == 0 {
        "ok"
    } else {
        "degraded"
    };
    Ok(Json(HealthBody { status, report }))
}
