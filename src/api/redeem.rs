// ============================================================================
// REDEMPTION PAGE - GET /s/{token}
// ============================================================================

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use std::sync::Arc;

use crate::api::templates::redeem_templates;
use crate::domains::survey::RedeemOutcome;
use crate::state::AppState;

/// Visitar la URL redime el token y muestra el resultado.
///
/// - 200: voto registrado
/// - 404: token desconocido
/// - 409: token ya utilizado
/// - 410: token expirado
/// - 500: fallo interno (el token queda intacto)
pub async fn redeem_page(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Response {
    match state.token_service.redeem_token(&token).await {
        Ok(RedeemOutcome::Redeemed(redemption)) => {
            let survey = state.catalog.survey(&redemption.token.survey_id);
            (
                StatusCode::OK,
                Html(redeem_templates::redeemed_page(&redemption, survey)),
            )
                .into_response()
        }
        Ok(RedeemOutcome::AlreadyUsed) => (
            StatusCode::CONFLICT,
            Html(redeem_templates::already_used_page()),
        )
            .into_response(),
        Ok(RedeemOutcome::Expired { expired_at }) => (
            StatusCode::GONE,
            Html(redeem_templates::expired_page(expired_at)),
        )
            .into_response(),
        Ok(RedeemOutcome::NotFound) => (
            StatusCode::NOT_FOUND,
            Html(redeem_templates::not_found_page()),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Redemption failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(redeem_templates::error_page()),
            )
                .into_response()
        }
    }
}

/// Fallback HTML para rutas desconocidas
pub async fn not_found_fallback() -> Response {
    (
        StatusCode::NOT_FOUND,
        Html(redeem_templates::page_not_found()),
    )
        .into_response()
}
