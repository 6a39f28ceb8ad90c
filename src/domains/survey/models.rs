//! Modelos del flujo de encuesta con tokens QR de un solo uso

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::catalog::Choice;

// ======================================================================
// ENCUESTAS
// ======================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Survey {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

// ======================================================================
// TOKENS
// ======================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QrToken {
    pub id: Uuid,
    pub token: String,
    pub survey_id: String,
    pub choice_id: i32,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl QrToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Token listo para insertar (todavía sin `used`, siempre nace en `false`)
#[derive(Debug, Clone)]
pub struct NewQrToken {
    pub id: Uuid,
    pub token: String,
    pub survey_id: String,
    pub choice_id: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl NewQrToken {
    pub fn into_token(self) -> QrToken {
        QrToken {
            id: self.id,
            token: self.token,
            survey_id: self.survey_id,
            choice_id: self.choice_id,
            expires_at: self.expires_at,
            used: false,
            created_at: self.created_at,
        }
    }
}

/// Token tal como lo ve el redentor: incluye si ya existe una respuesta
#[derive(Debug, Clone, FromRow)]
pub struct TokenLookup {
    #[sqlx(flatten)]
    pub token: QrToken,
    pub has_response: bool,
}

impl TokenLookup {
    pub fn is_consumed(&self) -> bool {
        self.token.used || self.has_response
    }
}

// ======================================================================
// RESPUESTAS
// ======================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SurveyResponse {
    pub id: Uuid,
    pub token_id: Uuid,
    pub created_at: DateTime<Utc>,
}

// ======================================================================
// EMISIÓN / REDENCIÓN
// ======================================================================

#[derive(Debug, Clone)]
pub struct IssueTokenRequest {
    pub survey_id: Option<String>,
    pub choice_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub survey_id: String,
    pub choice_id: i32,
    pub expires_at: DateTime<Utc>,
    /// Ruta relativa de redención, p. ej. `/s/{token}`
    pub url: String,
}

/// Resultado terminal de visitar una URL de redención
#[derive(Debug, Clone)]
pub enum RedeemOutcome {
    NotFound,
    AlreadyUsed,
    Expired { expired_at: DateTime<Utc> },
    Redeemed(Redemption),
}

impl RedeemOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyUsed => "already_used",
            Self::Expired { .. } => "expired",
            Self::Redeemed(_) => "redeemed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Redemption {
    pub token: QrToken,
    pub response: SurveyResponse,
    /// Metadatos de la opción si el catálogo la describe
    pub choice: Option<Choice>,
}

// ======================================================================
// ERRORS
// ======================================================================

#[derive(Debug, thiserror::Error)]
pub enum SurveyError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Encuesta no encontrada: {0}")]
    SurveyNotFound(String),

    #[error("Colisión de token al insertar")]
    TokenCollision,

    #[error("Error de base de datos: {0}")]
    Database(String),

    #[error("Error interno: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for SurveyError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return Self::TokenCollision;
            }
        }
        Self::Database(err.to_string())
    }
}

impl From<SurveyError> for shared::AppError {
    fn from(err: SurveyError) -> Self {
        match err {
            SurveyError::InvalidInput(msg) => shared::AppError::validation(msg),
            SurveyError::SurveyNotFound(_) => {
                shared::AppError::not_found("No se encontró la encuesta")
            }
            SurveyError::TokenCollision => {
                shared::AppError::internal("No se pudo generar un token único. Intenta nuevamente.")
            }
            SurveyError::Database(msg) => {
                tracing::error!("Survey store failure: {}", msg);
                shared::AppError::internal("Error al generar el token")
            }
            SurveyError::Internal(msg) => {
                tracing::error!("Survey internal failure: {}", msg);
                shared::AppError::internal("Error al generar el token")
            }
        }
    }
}
