//! HTTP surface for the batch registry.
//!
//! Thin JSON handlers over `db::repo`; every route maps 1:1 onto a registry
//! operation and carries no formatting or presentation logic.

use crate::db::{self, BatchDetail, Pool};
use crate::error::RegistryError;
use crate::model::{Batch, BatchStatus, MediaAttachment, MediaKind, NewBatch};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
}

impl AppState {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/batches", post(create_batch).get(list_batches))
        .route("/api/batches/:id", get(get_batch))
        .route("/api/batches/:id/advance", post(advance_batch))
        .route("/api/batches/:id/media", post(attach_media).get(list_media))
        .with_state(state)
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = match &self {
            RegistryError::Validation(_) | RegistryError::Geo(_) => StatusCode::BAD_REQUEST,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::InvalidTransition { .. } => StatusCode::CONFLICT,
            RegistryError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self, "registry operation failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "herbtrace-registry".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn create_batch(
    State(state): State<AppState>,
    Json(input): Json<NewBatch>,
) -> Result<(StatusCode, Json<BatchDetail>), RegistryError> {
    let id = db::create_batch(&state.pool, &input).await?;
    let detail = db::get_batch(&state.pool, id).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<BatchStatus>,
}

async fn list_batches(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Batch>>, RegistryError> {
    let batches = db::list_batches(&state.pool, query.status).await?;
    Ok(Json(batches))
}

async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchDetail>, RegistryError> {
    let detail = db::get_batch(&state.pool, id).await?;
    Ok(Json(detail))
}

#[derive(Debug, Deserialize)]
struct AdvanceRequest {
    to: BatchStatus,
}

async fn advance_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AdvanceRequest>,
) -> Result<Json<BatchDetail>, RegistryError> {
    let detail = db::advance_batch(&state.pool, id, req.to).await?;
    Ok(Json(detail))
}

#[derive(Debug, Deserialize)]
struct AttachMediaRequest {
    media_ref: String,
    #[serde(default = "default_media_kind")]
    kind: MediaKind,
}

fn default_media_kind() -> MediaKind {
    MediaKind::Photo
}

async fn attach_media(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AttachMediaRequest>,
) -> Result<(StatusCode, Json<MediaAttachment>), RegistryError> {
    let attachment = db::attach_media(&state.pool, id, &req.media_ref, req.kind).await?;
    Ok((StatusCode::CREATED, Json(attachment)))
}

async fn list_media(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<MediaAttachment>>, RegistryError> {
    let media = db::list_media(&state.pool, id).await?;
    Ok(Json(media))
}
