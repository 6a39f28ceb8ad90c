use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::observability::{metrics_handler, record_pool_usage};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub check_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Endpoints de monitoreo (sin autenticación)
pub fn monitoring_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(prometheus_metrics))
}

/// Liveness: si respondemos, estamos vivos
async fn health_check() -> impl IntoResponse {
    let health = serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": crate::monitoring::uptime_seconds(),
    });

    (StatusCode::OK, Json(health))
}

/// Readiness: el store debe responder
async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let start_time = std::time::Instant::now();

    if let Some(pool) = &state.db_pool {
        record_pool_usage("main", pool.size(), pool.num_idle());
    }

    let store = if state.db_pool.is_some() { "postgres" } else { "memory" };

    match state.store.ping().await {
        Ok(()) => {
            let check_duration_ms = start_time.elapsed().as_millis() as u64;
            info!(check_duration_ms, store, "Readiness check passed");
            (
                StatusCode::OK,
                Json(ReadinessResponse {
                    status: "ready",
                    store,
                    check_duration_ms,
                    error: None,
                }),
            )
        }
        Err(e) => {
            error!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "not_ready",
                    store,
                    check_duration_ms: start_time.elapsed().as_millis() as u64,
                    error: Some("store unreachable".to_string()),
                }),
            )
        }
    }
}

async fn prometheus_metrics() -> impl IntoResponse {
    metrics_handler().await
}
