// ============================================================================
// MIDDLEWARE PARA MÉTRICAS AUTOMÁTICAS
// ============================================================================

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::observability::record_http_request;

/// Etiqueta para requests que sólo llegan al fallback
pub const UNMATCHED_ENDPOINT: &str = "unmatched";

/// Registra método, ruta de la tabla de rutas, status y duración de cada request
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let endpoint = endpoint_label(&req);

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    record_http_request(&method, &endpoint, response.status().as_u16(), duration);

    response
}

/// Plantilla de la ruta (`/s/:token`), nunca la ruta cruda: tokens y rutas
/// inventadas no generan series nuevas.
fn endpoint_label(req: &Request) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_string())
}
