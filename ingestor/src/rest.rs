use crate::errors::Error;
use crate::ingest::IngestionCoordinator;
use crate::model::{Device, ManualReading, NewDevice, ReadingQuery, SensorReading};
use crate::store::TelemetryStore;
use crate::validate::{validate_manual_reading, validate_new_device, validate_reading_query};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
struct AppState {
    coordinator: IngestionCoordinator,
}

impl AppState {
    fn store(&self) -> &Arc<dyn TelemetryStore> {
        self.coordinator.store()
    }
}

pub fn create_router(coordinator: IngestionCoordinator) -> Router {
    let state = AppState { coordinator };

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/devices", post(create_device).get(list_devices))
        .route("/api/v1/devices/:device_id", get(get_device))
        .route("/api/v1/data/ingest", post(ingest_data))
        .route("/api/v1/data", get(list_data))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.store().health_check().await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn create_device(
    State(state): State<AppState>,
    Json(payload): Json<NewDevice>,
) -> Result<(StatusCode, Json<Device>), AppError> {
    validate_new_device(&payload)?;
    let device = state.store().create_device(&payload).await?;
    info!(device_id = %device.device_id, "Device registered");
    Ok((StatusCode::CREATED, Json(device)))
}

async fn list_devices(State(state): State<AppState>) -> Result<Json<Vec<Device>>, AppError> {
    Ok(Json(state.store().list_devices().await?))
}

async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Device>, AppError> {
    state
        .store()
        .get_device(&device_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError(Error::NotFound("Device not found".to_string())))
}

/// Manual ingestion for clients that cannot publish over MQTT.
async fn ingest_data(
    State(state): State<AppState>,
    Json(payload): Json<ManualReading>,
) -> Result<(StatusCode, Json<SensorReading>), AppError> {
    validate_manual_reading(&payload)?;
    let row = state.coordinator.ingest_manual(&payload).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn list_data(
    State(state): State<AppState>,
    Query(params): Query<ReadingQuery>,
) -> Result<Json<Vec<SensorReading>>, AppError> {
    validate_reading_query(&params)?;
    Ok(Json(state.store().list_readings(&params).await?))
}

struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Json(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("API error: {}", self.0);
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}
