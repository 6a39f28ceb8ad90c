//! Persistencia del flujo: trait del store y la implementación en memoria.
//!
//! La implementación Postgres vive en `pg_store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::models::{NewQrToken, QrToken, Survey, SurveyError, SurveyResponse, TokenLookup};

#[async_trait]
pub trait SurveyStore: Send + Sync {
    async fn find_survey(&self, survey_id: &str) -> Result<Option<Survey>, SurveyError>;

    /// Upsert idempotente (last writer wins sobre el título)
    async fn upsert_survey(&self, survey_id: &str, title: &str) -> Result<Survey, SurveyError>;

    /// Inserta un token nuevo. Un token repetido devuelve `SurveyError::TokenCollision`.
    async fn insert_token(&self, token: NewQrToken) -> Result<QrToken, SurveyError>;

    async fn find_token(&self, token: &str) -> Result<Option<TokenLookup>, SurveyError>;

    /// Marca el token como usado y crea la respuesta en un solo paso atómico.
    /// Devuelve `None` si otro intento ya lo consumió.
    async fn redeem_token(
        &self,
        token_id: Uuid,
        redeemed_at: DateTime<Utc>,
    ) -> Result<Option<SurveyResponse>, SurveyError>;

    async fn ping(&self) -> Result<(), SurveyError>;
}

#[derive(Default)]
struct MemoryTables {
    surveys: HashMap<String, Survey>,
    tokens: HashMap<String, QrToken>,
    token_ids: HashMap<Uuid, String>,
    responses: HashMap<Uuid, SurveyResponse>,
}

/// Store en memoria; un único mutex serializa cada operación
#[derive(Default)]
pub struct MemorySurveyStore {
    tables: Mutex<MemoryTables>,
}

impl MemorySurveyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn response_for(&self, token_id: Uuid) -> Option<SurveyResponse> {
        self.tables.lock().responses.get(&token_id).cloned()
    }

    pub fn token_count(&self) -> usize {
        self.tables.lock().tokens.len()
    }

    pub fn response_count(&self) -> usize {
        self.tables.lock().responses.len()
    }
}

#[async_trait]
impl SurveyStore for MemorySurveyStore {
    async fn find_survey(&self, survey_id: &str) -> Result<Option<Survey>, SurveyError> {
        Ok(self.tables.lock().surveys.get(survey_id).cloned())
    }

    async fn upsert_survey(&self, survey_id: &str, title: &str) -> Result<Survey, SurveyError> {
        let mut tables = self.tables.lock();
        let survey = tables
            .surveys
            .entry(survey_id.to_string())
            .and_modify(|s| s.title = title.to_string())
            .or_insert_with(|| Survey {
                id: survey_id.to_string(),
                title: title.to_string(),
                created_at: Utc::now(),
            });
        Ok(survey.clone())
    }

    async fn insert_token(&self, token: NewQrToken) -> Result<QrToken, SurveyError> {
        let mut tables = self.tables.lock();

        if !tables.surveys.contains_key(&token.survey_id) {
            return Err(SurveyError::Database(format!(
                "foreign key violation: survey {} does not exist",
                token.survey_id
            )));
        }
        if tables.tokens.contains_key(&token.token) || tables.token_ids.contains_key(&token.id) {
            return Err(SurveyError::TokenCollision);
        }

        let record = token.into_token();
        tables.token_ids.insert(record.id, record.token.clone());
        tables.tokens.insert(record.token.clone(), record.clone());
        Ok(record)
    }

    async fn find_token(&self, token: &str) -> Result<Option<TokenLookup>, SurveyError> {
        let tables = self.tables.lock();
        Ok(tables.tokens.get(token).map(|record| TokenLookup {
            has_response: tables.responses.contains_key(&record.id),
            token: record.clone(),
        }))
    }

    async fn redeem_token(
        &self,
        token_id: Uuid,
        redeemed_at: DateTime<Utc>,
    ) -> Result<Option<SurveyResponse>, SurveyError> {
        let mut guard = self.tables.lock();
        let tables = &mut *guard;

        let token_key = tables
            .token_ids
            .get(&token_id)
            .cloned()
            .ok_or_else(|| SurveyError::Database(format!("token {} does not exist", token_id)))?;

        let record = tables
            .tokens
            .get_mut(&token_key)
            .ok_or_else(|| SurveyError::Internal(format!("token index out of sync for {}", token_id)))?;

        // Compare-and-set sobre `used` + unicidad de la respuesta
        if record.used || tables.responses.contains_key(&token_id) {
            return Ok(None);
        }

        let response = SurveyResponse {
            id: Uuid::new_v4(),
            token_id,
            created_at: redeemed_at,
        };
        record.used = true;
        tables.responses.insert(token_id, response.clone());

        Ok(Some(response))
    }

    async fn ping(&self) -> Result<(), SurveyError> {
        Ok(())
    }
}
