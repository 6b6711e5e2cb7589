//! Message-router HTTP API.
//!
//! Routes:
//! - `POST /api/lookup`: resolve a handle, fetching through the scheduler on miss
//! - `GET /api/cache/{key}`: cache-only read, never fetches
//! - `POST /api/cache/invalidate|expire|delete`, `DELETE /api/cache`
//! - `GET /api/cache/count`, `POST /api/cache/prune`
//! - `GET|POST /api/backup`: checksummed export and import
//! - `POST /api/quota/reset`, `DELETE /api/consumers/{id}`
//! - `POST /api/breaker/reset`, `PUT /api/config`, `GET /health`

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::cache::backup::{export_backup, import_backup, BackupFile, ImportError, ImportOptions};
use crate::cache::manager::SharedCache;
use crate::cache::record::CacheRecord;
use crate::config::{Config, SettingsPatch, SharedConfig};
use crate::scheduler::breaker::BreakerState;
use crate::scheduler::dispatch::SharedScheduler;
use crate::scheduler::queue::Priority;
use crate::scheduler::{LookupError, LookupOutcome};
use crate::store::StoreError;

/// Application state shared across handlers.
pub struct AppState {
    pub config: SharedConfig,
    pub cache: SharedCache,
    pub scheduler: SharedScheduler,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/lookup", post(lookup))
        .route("/api/cache/{key}", get(cache_get))
        .route("/api/cache", delete(cache_clear))
        .route("/api/cache/count", get(cache_count))
        .route("/api/cache/invalidate", post(cache_invalidate))
        .route("/api/cache/expire", post(cache_expire))
        .route("/api/cache/delete", post(cache_delete))
        .route("/api/cache/prune", post(cache_prune))
        .route("/api/backup", get(backup_export).post(backup_import))
        .route("/api/quota/reset", post(quota_reset))
        .route("/api/consumers/{id}", delete(release_consumer))
        .route("/api/breaker/reset", post(breaker_reset))
        .route("/api/config", put(update_config))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Errors ────────────────────────────────────────────────────────────────

/// Handler-level failure, mapped onto an HTTP status plus a JSON body.
#[derive(Debug)]
enum ApiError {
    BreakerOpen,
    RateLimited,
    Transport(String),
    NotFound,
    ChecksumMismatch { declared: String, computed: String },
    BadRequest(String),
    Store(String),
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::BreakerOpen => ApiError::BreakerOpen,
            LookupError::RateLimited => ApiError::RateLimited,
            LookupError::Transport(message) => ApiError::Transport(message),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err.to_string())
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::ChecksumMismatch { declared, computed } => {
                ApiError::ChecksumMismatch { declared, computed }
            }
            ImportError::Format(err) => ApiError::BadRequest(err.to_string()),
            ImportError::Store(err) => ApiError::Store(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BreakerOpen => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"error": "circuit breaker open"}),
            ),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({"error": "upstream rate limit"}),
            ),
            ApiError::Transport(message) => (
                StatusCode::BAD_GATEWAY,
                json!({"error": format!("transport error: {message}")}),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, json!({"error": "not found"})),
            ApiError::ChecksumMismatch { declared, computed } => (
                StatusCode::CONFLICT,
                json!({
                    "error": "checksum mismatch",
                    "declared": declared,
                    "computed": computed,
                }),
            ),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({"error": message})),
            ApiError::Store(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": message}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

// ─── Request/Response Types ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PriorityParam {
    #[default]
    High,
    Low,
}

impl From<PriorityParam> for Priority {
    fn from(value: PriorityParam) -> Self {
        match value {
            PriorityParam::High => Priority::High,
            PriorityParam::Low => Priority::Low,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupRequest {
    key: String,
    #[serde(default)]
    priority: PriorityParam,
    #[serde(default)]
    consumer: Option<String>,
    #[serde(default)]
    force_refresh: bool,
}

#[derive(Debug, Serialize)]
struct RecordResponse {
    record: CacheRecord,
    stale: bool,
}

#[derive(Debug, Deserialize)]
struct KeysRequest {
    keys: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CountResponse {
    count: usize,
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    backup: BackupFile,
    #[serde(default)]
    trust: bool,
    #[serde(default)]
    allow_mismatch: bool,
}

#[derive(Debug, Deserialize)]
struct ConsumerRequest {
    consumer: String,
}

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_secs: u64,
    records: usize,
    buffered_writes: usize,
    queue: QueueDepths,
    breaker: BreakerHealth,
}

#[derive(Debug, Serialize)]
struct QueueDepths {
    high: usize,
    low: usize,
}

#[derive(Debug, Serialize)]
struct BreakerHealth {
    #[serde(flatten)]
    state: BreakerState,
    error_count: u32,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn lookup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LookupRequest>,
) -> Result<Json<RecordResponse>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    info!(
        request_id,
        key = req.key,
        priority = ?req.priority,
        force_refresh = req.force_refresh,
        "Lookup request"
    );

    let outcome = state
        .scheduler
        .submit(&req.key, req.priority.into(), req.consumer, req.force_refresh)
        .await?;

    match outcome {
        LookupOutcome::Found(record) => {
            // A tripped breaker can answer with a stale record; report it.
            let stale = record.is_stale(state.config.read().await.ttl_ms());
            Ok(Json(RecordResponse { record, stale }))
        }
        LookupOutcome::Missing => Err(ApiError::NotFound),
    }
}

async fn cache_get(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<RecordResponse>, ApiError> {
    match state.cache.get(&key).await? {
        Some(lookup) => Ok(Json(RecordResponse {
            record: lookup.record,
            stale: lookup.stale,
        })),
        None => Err(ApiError::NotFound),
    }
}

async fn cache_invalidate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KeysRequest>,
) -> Json<CountResponse> {
    state.cache.invalidate(&req.keys);
    Json(CountResponse {
        count: req.keys.len(),
    })
}

async fn cache_expire(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KeysRequest>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.cache.expire(&req.keys).await?;
    Ok(Json(CountResponse { count }))
}

async fn cache_delete(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KeysRequest>,
) -> Result<Json<CountResponse>, ApiError> {
    state.cache.delete(&req.keys).await?;
    Ok(Json(CountResponse {
        count: req.keys.len(),
    }))
}

async fn cache_clear(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.cache.clear().await?;
    info!("Cache cleared");
    Ok(StatusCode::NO_CONTENT)
}

async fn cache_count(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.cache.count().await?;
    Ok(Json(CountResponse { count }))
}

async fn cache_prune(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.cache.prune_expired().await?;
    Ok(Json(CountResponse { count }))
}

async fn backup_export(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BackupFile>, ApiError> {
    let backup = export_backup(&state.cache).await?;
    Ok(Json(backup))
}

async fn backup_import(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<CountResponse>, ApiError> {
    let options = ImportOptions {
        trusted: req.trust,
        allow_mismatch: req.allow_mismatch,
    };
    let count = import_backup(&state.cache, req.backup, options).await?;
    Ok(Json(CountResponse { count }))
}

async fn quota_reset(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConsumerRequest>,
) -> StatusCode {
    state.scheduler.reset_quota(&req.consumer).await;
    StatusCode::NO_CONTENT
}

async fn release_consumer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> StatusCode {
    state.scheduler.release_context(&id);
    StatusCode::NO_CONTENT
}

async fn breaker_reset(State(state): State<Arc<AppState>>) -> StatusCode {
    state.scheduler.breaker().reset().await;
    StatusCode::NO_CONTENT
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<Config>, ApiError> {
    let (reprune, updated) = {
        let mut config = state.config.write().await;
        let reprune = config.apply_patch(&patch);
        (reprune, config.clone())
    };
    info!(?patch, "Settings updated");

    // A shortened deletion age takes effect immediately.
    if reprune {
        state.cache.prune_expired().await?;
    }
    Ok(Json(updated))
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let (high, low) = state.scheduler.queue_depths();
    let breaker = state.scheduler.breaker();

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        records: state.cache.count().await?,
        buffered_writes: state.cache.buffered_writes(),
        queue: QueueDepths { high, low },
        breaker: BreakerHealth {
            state: breaker.state(),
            error_count: breaker.error_count(),
        },
    }))
}
