use axum::{extract::DefaultBodyLimit, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod domains;
pub mod state;

// Production-ready modules
pub mod monitoring;
pub mod observability;
pub mod optimization;
pub mod security;

use api::create_api_router;
use api::redeem::not_found_fallback;
use monitoring::endpoints::monitoring_router;
use observability::metrics_middleware;
use security::{get_cors_layer, security_headers_middleware, SecurityHeaders};
use state::AppState;

use axum::middleware as axum_middleware;

pub fn create_app_router(app_state: Arc<AppState>) -> Router {
    let body_limit = app_state.config.app.max_request_size_kb * 1024;
    let security_headers = SecurityHeaders::from_config(&app_state.config);

    Router::new()
        // Endpoints de monitoreo (sin autenticación) - incluye /metrics de Prometheus
        .merge(monitoring_router())
        .merge(create_api_router(app_state.clone()))
        .fallback(not_found_fallback)
        .with_state(app_state)
        .layer(axum_middleware::from_fn(metrics_middleware)) // 📊 Captura métricas automáticamente
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(get_cors_layer())
        .layer(axum_middleware::from_fn_with_state(
            security_headers,
            security_headers_middleware,
        ))
}
