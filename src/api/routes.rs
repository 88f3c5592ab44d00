//! HTTP handlers for the boundary operations

use crate::engine::{AdviceQuery, AdvisoryEngine, HealthState};
use crate::error::{EngineError, StoreError, ValidationError};
use crate::events::ServiceRegistration;
use crate::store::ResolveOutcome;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::error;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

pub type SharedEngine = Arc<AdvisoryEngine>;

/// Error returned by handlers, rendered as `{"error": ...}`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(e) => ApiError::BadRequest(e.to_string()),
            EngineError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        error!("Store failure while serving request: {}", err);
        ApiError::Internal("storage unavailable".to_string())
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Run synchronous engine work off the async runtime
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| {
            error!("Blocking task failed: {}", e);
            ApiError::Internal("request processing failed".to_string())
        })?
        .map_err(ApiError::from)
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ValidationError::InvalidBody(e.to_string()).into())
}

pub fn service_routes() -> Router<SharedEngine> {
    Router::new()
        .route("/api/v1/services", post(register_service))
        .route("/api/v1/services/:service_name", get(get_service))
}

pub fn log_routes() -> Router<SharedEngine> {
    Router::new().route("/api/v1/logs", post(ingest_logs))
}

pub fn advice_routes() -> Router<SharedEngine> {
    Router::new()
        .route("/api/v1/advice", get(list_advice))
        .route("/api/v1/advice/:advice_id", get(get_advice))
        .route("/api/v1/advice/:advice_id/resolve", post(resolve_advice))
        .route("/api/v1/dashboard", get(dashboard))
}

pub fn health_routes() -> Router<SharedEngine> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    success: bool,
    service_name: String,
}

async fn register_service(
    State(engine): State<SharedEngine>,
    body: Bytes,
) -> Result<Json<RegisterResponse>, ApiError> {
    let registration: ServiceRegistration = parse_json(&body)?;
    let service = blocking(move || engine.register_service(registration)).await?;
    Ok(Json(RegisterResponse {
        success: true,
        service_name: service.service_name,
    }))
}

async fn get_service(
    State(engine): State<SharedEngine>,
    Path(service_name): Path<String>,
) -> Result<Response, ApiError> {
    let name = service_name.clone();
    match blocking(move || engine.get_service(&name)).await? {
        Some(service) => Ok(Json(service).into_response()),
        None => Err(ApiError::NotFound(format!(
            "service '{}' is not registered",
            service_name
        ))),
    }
}

async fn ingest_logs(
    State(engine): State<SharedEngine>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload: serde_json::Value = parse_json(&body)?;
    let receipt = blocking(move || engine.ingest(payload)).await?;
    Ok(Json(receipt).into_response())
}

#[derive(Debug, Serialize)]
struct AdviceListResponse {
    status: String,
    count: usize,
    advice: Vec<crate::advice::Advice>,
}

async fn list_advice(
    State(engine): State<SharedEngine>,
    Query(query): Query<AdviceQuery>,
) -> Result<Json<AdviceListResponse>, ApiError> {
    let (status, _) = query.resolve()?;
    let advice = blocking(move || engine.list_advice(&query)).await?;
    Ok(Json(AdviceListResponse {
        status: status.to_string(),
        count: advice.len(),
        advice,
    }))
}

async fn get_advice(
    State(engine): State<SharedEngine>,
    Path(advice_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = advice_id.clone();
    match blocking(move || engine.get_advice(&id)).await? {
        Some(advice) => Ok(Json(advice).into_response()),
        None => Err(ApiError::NotFound(format!("advice '{}' not found", advice_id))),
    }
}

#[derive(Debug, Serialize)]
struct ResolveResponse {
    success: bool,
    #[serde(flatten)]
    outcome: ResolveOutcome,
}

async fn resolve_advice(
    State(engine): State<SharedEngine>,
    Path(advice_id): Path<String>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let outcome = blocking(move || engine.resolve_advice(&advice_id)).await?;
    Ok(Json(ResolveResponse {
        success: true,
        outcome,
    }))
}

async fn dashboard(State(engine): State<SharedEngine>) -> Result<Response, ApiError> {
    let dashboard = blocking(move || engine.dashboard()).await?;
    Ok(Json(dashboard).into_response())
}

async fn health(State(engine): State<SharedEngine>) -> Result<Response, ApiError> {
    let report = blocking(move || Ok(engine.health())).await?;
    let status = match report.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
    };
    Ok((status, Json(report)).into_response())
}
