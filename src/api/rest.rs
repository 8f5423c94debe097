// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Reads come straight from `AppState`;
// writes are forwarded to the connection supervisor, which owns the
// pipeline.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{FromRef, Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::error::{ErrorView, PipelineError};
use crate::supervisor::SupervisorHandle;
use crate::types::{ConnectionState, InstrumentSelector};

/// Shared state for every handler.
#[derive(Clone)]
pub struct ApiState {
    pub app: Arc<AppState>,
    pub supervisor: SupervisorHandle,
    /// Where `configure` persists the updated config. `None` disables saving.
    pub config_path: Option<PathBuf>,
}

impl FromRef<ApiState> for Arc<AppState> {
    fn from_ref(state: &ApiState) -> Self {
        state.app.clone()
    }
}

type ApiError = (StatusCode, Json<ErrorView>);

fn api_error(err: PipelineError) -> ApiError {
    let status = match err {
        PipelineError::InvalidSelector(_) => StatusCode::BAD_REQUEST,
        PipelineError::SupervisorGone => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, Json(ErrorView::from(&err)))
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/configure", post(configure))
        .route("/api/v1/refresh", post(refresh))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connection_state: ConnectionState,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        connection_state: state.connection.read().state,
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Full state snapshot
// =============================================================================

async fn full_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

// =============================================================================
// Configure
// =============================================================================

/// Omitted alert fields keep their current values.
#[derive(Debug, Deserialize)]
struct ConfigureRequest {
    symbol: String,
    interval: String,
    confidence_threshold: Option<f64>,
    alerts_enabled: Option<bool>,
    alert_volume: Option<f64>,
    notifications_enabled: Option<bool>,
}

#[derive(Serialize)]
struct ControlResponse {
    selector: Option<String>,
    message: String,
}

async fn configure(
    State(state): State<ApiState>,
    Json(req): Json<ConfigureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let selector = InstrumentSelector::parse(&req.symbol, &req.interval).map_err(|e| {
        warn!(error = %e, "configure rejected");
        api_error(e)
    })?;

    let current = state.app.runtime_config.read().alert_settings();
    state
        .supervisor
        .configure(
            selector.clone(),
            req.confidence_threshold.unwrap_or(current.confidence_threshold),
            req.alerts_enabled.unwrap_or(current.alerts_enabled),
            req.alert_volume.unwrap_or(current.alert_volume),
            req.notifications_enabled.unwrap_or(current.notifications_enabled),
        )
        .await
        .map_err(api_error)?;

    if let Some(path) = &state.config_path {
        let snapshot = state.app.runtime_config.read().clone();
        if let Err(e) = snapshot.save(path) {
            warn!(error = %e, "Failed to save runtime config to disk");
        }
    }

    info!(selector = %selector, "pipeline configured via API");
    Ok(Json(ControlResponse {
        selector: Some(selector.to_string()),
        message: "Configuration applied".to_string(),
    }))
}

// =============================================================================
// Refresh
// =============================================================================

async fn refresh(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    state.supervisor.refresh().await.map_err(api_error)?;
    let selector = state
        .app
        .connection
        .read()
        .selector
        .as_ref()
        .map(ToString::to_string);
    info!("manual refresh via API");

    Ok(Json(ControlResponse {
        selector,
        message: "Reconnecting".to_string(),
    }))
}

// =============================================================================
// Tests
// =============================================================================
