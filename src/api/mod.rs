pub mod qr;
pub mod redeem;
pub mod surveys;
pub mod templates;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::security::rate_limiting_middleware;
use crate::state::AppState;

/// Rutas de la API y de la página de redención.
/// El rate limit sólo aplica a los endpoints de emisión.
pub fn create_api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let issue_routes = Router::new()
        .route("/api/qr", post(qr::issue_qr_token))
        .route("/api/qr/sms", post(qr::issue_sms_qr))
        .route_layer(from_fn_with_state(state, rate_limiting_middleware));

    Router::new()
        .merge(issue_routes)
        .route("/api/surveys/:id", get(surveys::get_survey))
        .route("/s/:token", get(redeem::redeem_page))
}
