use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;
use shared::AppError;
use std::sync::Arc;

use crate::domains::survey::Choice;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SurveyView {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub choices: Vec<Choice>,
}

/// GET /api/surveys/{id}: metadatos de la encuesta para la página de selección
pub async fn get_survey(
    State(state): State<Arc<AppState>>,
    Path(survey_id): Path<String>,
) -> Result<Json<SurveyView>, AppError> {
    let survey = state
        .catalog
        .survey(&survey_id)
        .ok_or_else(|| AppError::not_found("No se encontró la encuesta"))?;

    Ok(Json(SurveyView {
        id: survey.id.clone(),
        title: survey.title.clone(),
        subtitle: survey.subtitle.clone(),
        choices: survey.choices.clone(),
    }))
}
