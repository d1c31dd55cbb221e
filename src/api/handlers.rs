use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Json, Response},
    Json as RequestJson,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::format::{render_serial, render_value, ResponseFormat};
use crate::engine::{KnowledgeEngine, SweepReport};
use crate::error::EngineError;
use crate::logic::{ImportOutcome, ReleaseOutcome};
use crate::model::{DataSet, Id, NotificationPayload, SerialFormat, SubscriptionToThis, VersionRequest};
use crate::store::Store;

pub type AppState<S> = Arc<KnowledgeEngine<S>>;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

/// Map an engine failure onto a status code and error body
pub fn engine_error(error: EngineError) -> ApiError {
    let status = match &error {
        EngineError::NotFound(_) | EngineError::Unresolved(_) => StatusCode::NOT_FOUND,
        EngineError::AlreadyExists(_) => StatusCode::CONFLICT,
        EngineError::DanglingReference { .. } | EngineError::AmbiguousSuccessor { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineError::Transport(_) => StatusCode::BAD_GATEWAY,
        e if e.is_rejection() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        log::error!("Request failed: {}", error);
    } else {
        log::debug!("Request rejected ({}): {}", status, error);
    }
    (status, Json(ErrorResponse::new(&error.to_string())))
}

#[derive(Debug, Deserialize)]
pub struct FormatQuery {
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DatasetUriQuery {
    pub uri: String,
    pub format: Option<String>,
}

/// Acknowledgement body the peers of a federation check for
#[derive(Debug, Serialize)]
pub struct StatusResponse<T> {
    pub status: String,
    #[serde(flatten)]
    pub detail: T,
}

impl<T> StatusResponse<T> {
    pub fn success(detail: T) -> Self {
        Self {
            status: "success".to_string(),
            detail,
        }
    }
}

// ---- datasets ----

/// GET /datasets/by-uri?uri=...&format=xml|json|browse
pub async fn get_dataset_by_uri<S: Store + 'static>(
    State(engine): State<AppState<S>>,
    Query(query): Query<DatasetUriQuery>,
) -> Result<Response, ApiError> {
    let format = ResponseFormat::from_query(query.format.as_deref())?;
    let node = engine.dataset_serial(&query.uri).map_err(engine_error)?;
    render_serial(&node, &query.uri, format)
}

/// GET /records/by-uri?uri=...&format=xml|json|browse
pub async fn get_record_by_uri<S: Store + 'static>(
    State(engine): State<AppState<S>>,
    Query(query): Query<DatasetUriQuery>,
) -> Result<Response, ApiError> {
    let format = ResponseFormat::from_query(query.format.as_deref())?;
    let node = engine.record_serial(&query.uri).map_err(engine_error)?;
    render_serial(&node, &query.uri, format)
}

/// GET /datasets/version-info?uri=...
pub async fn get_version_info<S: Store + 'static>(
    State(engine): State<AppState<S>>,
    Query(query): Query<DatasetUriQuery>,
) -> Result<Response, ApiError> {
    let format = ResponseFormat::from_query(query.format.as_deref())?;
    let info = engine.version_info(&query.uri).map_err(engine_error)?;
    render_value(&info, "VersionInfo", format)
}

/// POST /datasets/import?format=xml|json with the document as body
pub async fn import_dataset<S: Store + 'static>(
    State(engine): State<AppState<S>>,
    Query(query): Query<FormatQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<ImportOutcome>), ApiError> {
    let format = match ResponseFormat::from_query(query.format.as_deref())? {
        ResponseFormat::Xml => SerialFormat::Xml,
        _ => SerialFormat::Json,
    };
    let text = String::from_utf8(body.to_vec()).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Request body is not valid UTF-8")),
        )
    })?;
    let outcome = engine.import_dataset(&text, format).map_err(engine_error)?;
    log::info!("Imported {} ({} dangling)", outcome.dataset.uri, outcome.dangling);
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST /datasets/:id/versions
pub async fn create_new_version<S: Store + 'static>(
    State(engine): State<AppState<S>>,
    Path(dataset_id): Path<Id>,
    RequestJson(request): RequestJson<VersionRequest>,
) -> Result<(StatusCode, Json<DataSet>), ApiError> {
    let dataset = engine.new_version(&dataset_id, &request).map_err(engine_error)?;
    Ok((StatusCode::CREATED, Json(dataset)))
}

/// POST /datasets/:id/release
pub async fn release_dataset<S: Store + 'static>(
    State(engine): State<AppState<S>>,
    Path(dataset_id): Path<Id>,
) -> Result<Json<ReleaseOutcome>, ApiError> {
    let outcome = engine.release(&dataset_id).map_err(engine_error)?;
    Ok(Json(outcome))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: usize,
}

/// DELETE /datasets/:id
pub async fn delete_dataset<S: Store + 'static>(
    State(engine): State<AppState<S>>,
    Path(dataset_id): Path<Id>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = engine.delete_dataset(&dataset_id).map_err(engine_error)?;
    Ok(Json(DeleteResponse { deleted }))
}

// ---- structures ----

/// GET /structures/:name?format=...
pub async fn get_structure<S: Store + 'static>(
    State(engine): State<AppState<S>>,
    Path(name): Path<String>,
    Query(query): Query<FormatQuery>,
) -> Result<Response, ApiError> {
    let format = ResponseFormat::from_query(query.format.as_deref())?;
    let node = engine.structure_serial(&name).map_err(engine_error)?;
    render_serial(&node, &name, format)
}

/// GET /structures/:name/datasets
pub async fn list_structure_datasets<S: Store + 'static>(
    State(engine): State<AppState<S>>,
    Path(name): Path<String>,
    Query(query): Query<FormatQuery>,
) -> Result<Response, ApiError> {
    let format = ResponseFormat::from_query(query.format.as_deref())?;
    let items = engine.datasets_of_structure(&name).map_err(engine_error)?;
    let total = items.len();
    render_value(&ListResponse { items, total }, "DataSets", format)
}

// ---- federation ----

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub first_version_uri: String,
    pub callback_url: String,
    pub remote_server_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub first_version_uri: String,
    pub callback_url: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionDetail {
    pub subscription: SubscriptionToThis,
}

#[derive(Debug, Serialize)]
pub struct CancelDetail {
    pub removed: bool,
}

#[derive(Debug, Serialize)]
pub struct ReceivedDetail {
    pub id: Id,
}

/// POST /subscriptions
pub async fn subscribe<S: Store + 'static>(
    State(engine): State<AppState<S>>,
    RequestJson(request): RequestJson<SubscribeRequest>,
) -> Result<(StatusCode, Json<StatusResponse<SubscriptionDetail>>), ApiError> {
    let subscription = engine
        .accept_subscription(
            &request.first_version_uri,
            &request.callback_url,
            request.remote_server_uri.as_deref(),
        )
        .map_err(engine_error)?;
    log::info!(
        "Accepted subscription to {} from {}",
        subscription.first_version_uri,
        subscription.callback_url
    );
    Ok((
        StatusCode::CREATED,
        Json(StatusResponse::success(SubscriptionDetail { subscription })),
    ))
}

/// POST /subscriptions/cancel
pub async fn unsubscribe<S: Store + 'static>(
    State(engine): State<AppState<S>>,
    RequestJson(request): RequestJson<UnsubscribeRequest>,
) -> Result<Json<StatusResponse<CancelDetail>>, ApiError> {
    let removed = engine
        .cancel_subscription(&request.first_version_uri, &request.callback_url)
        .map_err(engine_error)?;
    Ok(Json(StatusResponse::success(CancelDetail { removed })))
}

/// POST /notifications; the fetch happens later in the received sweep
pub async fn receive_notification<S: Store + 'static>(
    State(engine): State<AppState<S>>,
    RequestJson(payload): RequestJson<NotificationPayload>,
) -> Result<Json<StatusResponse<ReceivedDetail>>, ApiError> {
    let received = engine.receive_notification(payload).map_err(engine_error)?;
    Ok(Json(StatusResponse::success(ReceivedDetail { id: received.id })))
}

#[derive(Debug, Serialize)]
pub struct SweepEntry {
    pub sweep: String,
    #[serde(flatten)]
    pub report: SweepReport,
}

/// POST /sweeps/run; lets an external scheduler drive the periodic jobs
pub async fn run_sweeps<S: Store + 'static>(
    State(engine): State<AppState<S>>,
) -> Result<Json<ListResponse<SweepEntry>>, ApiError> {
    let reports = engine.run_all_sweeps().await;
    let items: Vec<SweepEntry> = reports
        .into_iter()
        .map(|(sweep, report)| SweepEntry {
            sweep: sweep.to_string(),
            report,
        })
        .collect();
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}
