// ============================================================================
// QR ENDPOINTS - Emisión de tokens de un solo uso
// ============================================================================

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use shared::AppError;
use std::sync::Arc;
use tracing::{error, info, warn};
use validator::Validate;

use crate::domains::survey::{normalize_phone, IssueTokenRequest};
use crate::observability::record_qr_generated;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueQrRequest {
    pub survey_id: Option<String>,
    pub choice_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct IssueQrResponse {
    pub url: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SmsQrRequest {
    pub survey_id: Option<String>,
    pub choice_id: Option<i64>,
    #[serde(default)]
    #[validate(length(min = 1, max = 32, message = "phoneNumber es obligatorio"))]
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsQrResponse {
    /// Ruta relativa, igual que en /api/qr
    pub url: String,
    /// URL absoluta que viaja dentro del SMS
    pub redeem_url: String,
    pub sms_uri: String,
    /// PNG en base64 del QR que abre el SMS
    pub qr_png: String,
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        warn!("Rejected request body: {}", rejection.body_text());
        AppError::validation("El cuerpo de la solicitud debe ser JSON válido")
    })
}

/// Emite un token para (surveyId, choiceId)
///
/// # Endpoint
/// POST /api/qr
///
/// # Returns
/// - 200 OK: `{ "url": "/s/{token}" }`
/// - 400 Bad Request: campos faltantes, choiceId fuera de rango o JSON inválido
/// - 404 Not Found: la encuesta no existe
/// - 500 Internal Server Error: fallo de persistencia
pub async fn issue_qr_token(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IssueQrRequest>, JsonRejection>,
) -> Result<Json<IssueQrResponse>, AppError> {
    let body = json_body(payload)?;

    let issued = state
        .token_service
        .issue_token(IssueTokenRequest {
            survey_id: body.survey_id,
            choice_id: body.choice_id,
        })
        .await?;

    Ok(Json(IssueQrResponse { url: issued.url }))
}

/// Emite un token y arma el QR que abre la app de SMS con el enlace
///
/// # Endpoint
/// POST /api/qr/sms
pub async fn issue_sms_qr(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SmsQrRequest>, JsonRejection>,
) -> Result<Json<SmsQrResponse>, AppError> {
    let body = json_body(payload)?;

    if let Err(errors) = body.validate() {
        let message = errors
            .field_errors()
            .values()
            .flat_map(|errs| errs.iter())
            .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
            .unwrap_or_else(|| "Solicitud inválida".to_string());
        return Err(AppError::validation(message));
    }

    // El teléfono se valida antes de emitir para no dejar tokens huérfanos
    let phone = normalize_phone(&body.phone_number)?;

    let issued = state
        .token_service
        .issue_token(IssueTokenRequest {
            survey_id: body.survey_id,
            choice_id: body.choice_id,
        })
        .await?;

    let generator = &state.qr_generator;
    let redeem_url = generator.absolute_url(&issued.url);
    let sms_uri = generator.sms_deep_link(&phone, &generator.sms_body(&redeem_url));

    let png = generator.render_png(&sms_uri).map_err(|e| {
        error!("Failed to render SMS QR: {:#}", e);
        AppError::internal("Error al generar el código QR")
    })?;

    record_qr_generated("png");
    info!(
        "SMS QR generated for survey_id={} ({} bytes)",
        issued.survey_id,
        png.len()
    );

    Ok(Json(SmsQrResponse {
        url: issued.url,
        redeem_url,
        sms_uri,
        qr_png: STANDARD.encode(png),
    }))
}
