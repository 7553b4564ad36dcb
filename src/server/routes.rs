//! HTTP surface of the sync server. Every route lives under `/api`.

use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::reconcile::{
    reconcile_batch, reconcile_kind_batch, reconcile_one, IncomingBatch, IncomingKindBatch,
    ReconcileError,
};
use super::storage::{ServerStorage, StorageError};
use crate::models::{Customer, Entity, Measurement, Order};
use crate::now_millis;
use crate::sync::mapper::stored_to_wire;
use crate::sync::protocol::{BatchSyncResponse, HealthResponse, KindSyncResponse, WireRecord};

/// Uploads from a device that was offline for a long time can be large.
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub storage: ServerStorage,
}

/// Errors returned by the API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRecord(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<ReconcileError> for ApiError {
    fn from(error: ReconcileError) -> Self {
        match error {
            ReconcileError::Storage(e) if !e.is_record_error() => ApiError::Storage(e),
            e => ApiError::InvalidRecord(e.to_string()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    success: bool,
    message: String,
    server_timestamp: i64,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidRecord(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Storage(e) => {
                tracing::error!("Request failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = ErrorBody {
            success: false,
            message: self.to_string(),
            server_timestamp: now_millis(),
        };
        (status, Json(body)).into_response()
    }
}

/// Builds the full router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/sync/batch", post(batch_sync))
        .merge(kind_routes::<Customer>())
        .merge(kind_routes::<Order>())
        .merge(kind_routes::<Measurement>());

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

fn kind_routes<E: Entity>() -> Router<AppState> {
    let base = format!("/{}", E::KIND.collection());

    Router::new()
        .route(&base, get(list_records::<E>).post(upsert_record::<E>))
        .route(&format!("{}/modified", base), get(modified_records::<E>))
        .route(&format!("{}/batch", base), post(kind_batch::<E>))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn batch_sync(
    State(state): State<AppState>,
    Json(batch): Json<IncomingBatch>,
) -> Result<Json<BatchSyncResponse>, ApiError> {
    Ok(Json(reconcile_batch(&state.storage, batch).await?))
}

async fn list_records<E: Entity>(
    State(state): State<AppState>,
) -> Result<Json<Vec<WireRecord<E>>>, ApiError> {
    let records = state.storage.list::<E>().await?;
    Ok(Json(
        records
            .into_iter()
            .map(|stored| stored_to_wire(stored, None))
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
struct ModifiedQuery {
    #[serde(default)]
    since: i64,
}

async fn modified_records<E: Entity>(
    State(state): State<AppState>,
    Query(query): Query<ModifiedQuery>,
) -> Result<Json<Vec<WireRecord<E>>>, ApiError> {
    let records = state
        .storage
        .modified_since::<E>(query.since, &Default::default())
        .await?;
    Ok(Json(
        records
            .into_iter()
            .map(|stored| stored_to_wire(stored, None))
            .collect(),
    ))
}

async fn upsert_record<E: Entity>(
    State(state): State<AppState>,
    Json(value): Json<Value>,
) -> Result<Json<WireRecord<E>>, ApiError> {
    Ok(Json(reconcile_one::<E>(&state.storage, value).await?))
}

async fn kind_batch<E: Entity>(
    State(state): State<AppState>,
    Json(batch): Json<IncomingKindBatch>,
) -> Result<Json<KindSyncResponse<E>>, ApiError> {
    Ok(Json(reconcile_kind_batch::<E>(&state.storage, batch).await?))
}
