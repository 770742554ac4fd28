use crate::errors::Error;
use crate::model::{AlertsResponse, DeviceId, TelemetryResponse, TelemetrySample};
use crate::service::{effective_limit, SensorService, DEFAULT_ALERT_LIMIT, DEFAULT_RECENT_LIMIT};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone)]
struct AppState {
    service: Arc<SensorService>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

pub fn create_router(service: Arc<SensorService>) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/api/v1/sensors/data", post(ingest_sample))
        .route("/api/v1/sensors/data/:device_id", get(get_recent_samples))
        .route("/api/v1/alerts", get(get_alerts))
        .route("/api/v1/alerts/:id/ack", post(acknowledge_alert))
        .route("/health", get(health))
        .with_state(state)
}

async fn ingest_sample(
    State(state): State<AppState>,
    Json(sample): Json<TelemetrySample>,
) -> Result<impl IntoResponse, AppError> {
    state.service.ingest_sample(sample).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "data received" }))))
}

async fn get_recent_samples(
    State(state): State<AppState>,
    Path(device_id): Path<DeviceId>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<TelemetryResponse>, AppError> {
    let samples = state
        .service
        .recent_samples(device_id, params.limit)
        .await?
        .ok_or_else(|| Error::NotFound(format!("no data for device {}", device_id)))?;

    Ok(Json(TelemetryResponse {
        total: samples.len(),
        limit: effective_limit(params.limit, DEFAULT_RECENT_LIMIT),
        data: samples,
    }))
}

async fn get_alerts(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<AlertsResponse>, AppError> {
    let alerts = state.service.unacknowledged_alerts(params.limit).await?;
    Ok(Json(AlertsResponse {
        total: alerts.len(),
        limit: effective_limit(params.limit, DEFAULT_ALERT_LIMIT),
        data: alerts,
    }))
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.service.acknowledge_alert(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let subscribers = state.service.hub().subscriber_count().await;
    Json(json!({ "status": "ok", "subscribers": subscribers }))
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<Error>() {
            Some(Error::Validation(_)) => StatusCode::BAD_REQUEST,
            Some(Error::NotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("API error: {}", self.0);
        } else {
            warn!("API request rejected: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
