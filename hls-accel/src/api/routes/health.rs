//! Health check routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::api::error::ApiResult;
use crate::api::models::{ComponentHealth, HealthResponse};
use crate::api::server::AppState;
use crate::database;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/live", get(liveness_check))
}

async fn database_health(state: &AppState) -> ComponentHealth {
    let (status, message) = match &state.pool {
        Some(pool) => match database::ping(pool).await {
            Ok(()) => ("healthy", None),
            Err(e) => ("unhealthy", Some(e.to_string())),
        },
        None => ("unknown", Some("No database pool attached".to_string())),
    };
    ComponentHealth {
        name: "database".to_string(),
        status: status.to_string(),
        message,
    }
}

async fn engine_health(state: &AppState) -> ComponentHealth {
    let (status, message) = match state.manager.engine().version().await {
        Ok(version) => ("healthy", Some(format!("version {version}"))),
        Err(e) => ("unhealthy", Some(e.to_string())),
    };
    ComponentHealth {
        name: "fetch_engine".to_string(),
        status: status.to_string(),
        message,
    }
}

/// Overall health. An unreachable component degrades the status but the
/// endpoint still answers 200.
async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let uptime = state.start_time.elapsed().as_secs();
    let components = vec![database_health(&state).await, engine_health(&state).await];

    let status = if components.iter().all(|c| c.status == "healthy") {
        "healthy"
    } else {
        "degraded"
    };

    Ok(Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
        components,
    }))
}

/// Ready once the database answers. The fetch engine is optional for serving:
/// without it requests fall back to live pass-through.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if database_health(&state).await.status == "unhealthy" {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    } else {
        (StatusCode::OK, "ready")
    }
}

async fn liveness_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "uptime_secs": uptime
        })),
    )
}
