//! REST API Handlers
//!
//! Every mutating route validates its request, spawns a reconciliation run
//! and answers `202 Accepted` with the id of the operation to poll.

use super::operations::{OperationRecord, OperationTable};
use crate::engine::{EngineRef, EngineRegistry};
use crate::error::Error;
use crate::metrics::Metrics;
use crate::options::{parse_assignments, LeafKind};
use crate::reconcile::{
    BackupSpec, CreateSpec, DeleteSpec, EditSpec, Operation, ReconciliationDriver, RestoreSpec,
    UpgradeSpec,
};
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Optional operator version pin on every engine route
#[derive(Debug, Default, Clone, Deserialize)]
pub struct EngineQuery {
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionInfo {
    pub key: String,
    pub path: String,
    pub kind: String,
    /// Setting the key allocates an absent parent section
    pub optional: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsRequest {
    #[serde(default)]
    pub options: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRequest {
    pub version: String,
    #[serde(default)]
    pub options: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRequest {
    pub backup_name: String,
    pub storage: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    pub restore_name: String,
    pub backup_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationAccepted {
    pub operation_id: String,
    pub operation: String,
    pub engine: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiErrorResponse {
    fn from_error(e: &Error) -> (StatusCode, Self) {
        let (status, code) = match e {
            Error::UnknownEngine { .. } => (StatusCode::NOT_FOUND, "unknown_engine"),
            Error::UnknownOption { .. } => (StatusCode::BAD_REQUEST, "invalid_option"),
            Error::TypeCoercion { .. } => (StatusCode::BAD_REQUEST, "invalid_value"),
            Error::Configuration(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        (
            status,
            Self {
                error: code.into(),
                message: e.to_string(),
                details: e.hint(),
            },
        )
    }
}

fn error_response(e: &Error) -> Response {
    let (status, body) = ApiErrorResponse::from_error(e);
    (status, Json(body)).into_response()
}

// =============================================================================
// REST Router
// =============================================================================

pub struct BrokerRouter {
    registry: Arc<EngineRegistry>,
    driver: ReconciliationDriver,
    metrics: Arc<Metrics>,
    operations: Arc<OperationTable>,
}

impl BrokerRouter {
    pub fn new(
        registry: Arc<EngineRegistry>,
        driver: ReconciliationDriver,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            driver,
            metrics,
            operations: OperationTable::new(),
        }
    }

    /// Keep finished operations pollable for `retention`
    pub fn with_operation_retention(mut self, retention: Duration) -> Self {
        self.operations = OperationTable::with_retention(retention);
        self
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            registry: self.registry,
            driver: self.driver,
            metrics: self.metrics,
            operations: self.operations,
        };

        Router::new()
            // Engine endpoints
            .route("/v1/engines", get(list_engines))
            .route("/v1/engines/:engine/options", get(list_options))
            // Cluster endpoints
            .route("/v1/engines/:engine/clusters", post(create_cluster))
            .route(
                "/v1/engines/:engine/clusters/:name",
                patch(edit_cluster).delete(delete_cluster),
            )
            .route("/v1/engines/:engine/clusters/:name/upgrade", post(upgrade_cluster))
            .route("/v1/engines/:engine/clusters/:name/backups", post(backup_cluster))
            .route("/v1/engines/:engine/clusters/:name/restores", post(restore_cluster))
            // Operation endpoints
            .route("/v1/operations/:id", get(get_operation))
            // Health and metrics
            .route("/health", get(health_check))
            .route("/metrics", get(render_metrics))
            .with_state(state)
    }
}

#[derive(Clone)]
struct AppState {
    registry: Arc<EngineRegistry>,
    driver: ReconciliationDriver,
    metrics: Arc<Metrics>,
    operations: Arc<OperationTable>,
}

impl AppState {
    fn engine(&self, name: &str, query: &EngineQuery) -> Result<EngineRef, Response> {
        self.registry
            .get(name, query.version.as_deref())
            .map_err(|e| error_response(&e))
    }

    /// Spawn `operation` and answer with its id
    fn accept(&self, engine: EngineRef, operation: Operation) -> Response {
        let verb = operation.verb();
        let target = operation.target().to_string();
        let engine_name = engine.name().to_string();
        info!("Accepted {} of {} ({})", verb, target, engine_name);

        let handle = self.driver.spawn(engine, operation);
        let operation_id = self.operations.track(verb, &engine_name, &target, handle);
        (
            StatusCode::ACCEPTED,
            Json(OperationAccepted {
                operation_id,
                operation: verb.to_string(),
                engine: engine_name,
                target,
            }),
        )
            .into_response()
    }
}

/// Reject override strings that name unknown keys before spawning a run
fn check_options(engine: &EngineRef, overrides: &str) -> Result<(), Response> {
    for assignment in parse_assignments(overrides) {
        if !engine.options().contains(assignment.key) {
            return Err(error_response(&Error::UnknownOption {
                key: assignment.key.trim().to_string(),
            }));
        }
    }
    Ok(())
}

fn check_name(what: &str, name: &str) -> Result<(), Response> {
    if name.trim().is_empty() {
        return Err(error_response(&Error::Configuration(format!(
            "{} must not be empty",
            what
        ))));
    }
    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_engines(State(state): State<AppState>) -> impl IntoResponse {
    let engines: Vec<EngineInfo> = state
        .registry
        .list()
        .into_iter()
        .map(|(name, version)| EngineInfo { name, version })
        .collect();
    Json(engines)
}

async fn list_options(
    State(state): State<AppState>,
    Path(engine): Path<String>,
    Query(query): Query<EngineQuery>,
) -> Response {
    let engine = match state.engine(&engine, &query) {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    let options: Vec<OptionInfo> = engine
        .options()
        .iter()
        .filter(|(_, entry)| !matches!(entry.kind, LeafKind::Composite))
        .map(|(key, entry)| OptionInfo {
            key: key.to_string(),
            path: entry.display_path(),
            kind: entry.kind.to_string(),
            optional: entry.optional,
        })
        .collect();
    Json(options).into_response()
}

async fn create_cluster(
    State(state): State<AppState>,
    Path(engine): Path<String>,
    Query(query): Query<EngineQuery>,
    Json(request): Json<CreateSpec>,
) -> Response {
    let engine = match state.engine(&engine, &query) {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    if let Err(response) = check_name("cluster name", &request.name)
        .and_then(|_| check_options(&engine, &request.options))
    {
        return response;
    }
    state.accept(engine, Operation::Create(request))
}

async fn edit_cluster(
    State(state): State<AppState>,
    Path((engine, name)): Path<(String, String)>,
    Query(query): Query<EngineQuery>,
    Json(request): Json<OptionsRequest>,
) -> Response {
    let engine = match state.engine(&engine, &query) {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    if let Err(response) = check_options(&engine, &request.options) {
        return response;
    }
    state.accept(
        engine,
        Operation::Edit(EditSpec {
            name,
            options: request.options,
        }),
    )
}

async fn upgrade_cluster(
    State(state): State<AppState>,
    Path((engine, name)): Path<(String, String)>,
    Query(query): Query<EngineQuery>,
    Json(request): Json<UpgradeRequest>,
) -> Response {
    let engine = match state.engine(&engine, &query) {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    if let Err(e) = engine.upgrade_overrides(&request.version) {
        return error_response(&e);
    }
    if let Err(response) = check_options(&engine, &request.options) {
        return response;
    }
    state.accept(
        engine,
        Operation::Upgrade(UpgradeSpec {
            name,
            version: request.version,
            options: request.options,
        }),
    )
}

async fn delete_cluster(
    State(state): State<AppState>,
    Path((engine, name)): Path<(String, String)>,
    Query(query): Query<EngineQuery>,
) -> Response {
    match state.engine(&engine, &query) {
        Ok(engine) => state.accept(engine, Operation::Delete(DeleteSpec { name })),
        Err(response) => response,
    }
}

async fn backup_cluster(
    State(state): State<AppState>,
    Path((engine, cluster)): Path<(String, String)>,
    Query(query): Query<EngineQuery>,
    Json(request): Json<BackupRequest>,
) -> Response {
    let engine = match state.engine(&engine, &query) {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    if let Err(response) = check_name("backup name", &request.backup_name)
        .and_then(|_| check_name("storage", &request.storage))
    {
        return response;
    }
    state.accept(
        engine,
        Operation::Backup(BackupSpec {
            cluster,
            backup_name: request.backup_name,
            storage: request.storage,
        }),
    )
}

async fn restore_cluster(
    State(state): State<AppState>,
    Path((engine, cluster)): Path<(String, String)>,
    Query(query): Query<EngineQuery>,
    Json(request): Json<RestoreRequest>,
) -> Response {
    let engine = match state.engine(&engine, &query) {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    if let Err(response) = check_name("restore name", &request.restore_name)
        .and_then(|_| check_name("backup name", &request.backup_name))
    {
        return response;
    }
    state.accept(
        engine,
        Operation::Restore(RestoreSpec {
            cluster,
            restore_name: request.restore_name,
            backup_name: request.backup_name,
        }),
    )
}

async fn get_operation(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.operations.get(&id) {
        Some(record) => Json::<OperationRecord>(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiErrorResponse {
                error: "not_found".into(),
                message: format!("Operation {} not found", id),
                details: None,
            }),
        )
            .into_response(),
    }
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("Cannot render metrics: {}", e);
            error_response(&e)
        }
    }
}
