use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{NewQrToken, QrToken, Survey, SurveyError, SurveyResponse, TokenLookup};
use super::store::SurveyStore;

/// Store sobre PostgreSQL (esquema `survey`)
#[derive(Clone)]
pub struct PgSurveyStore {
    db: PgPool,
}

impl PgSurveyStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SurveyStore for PgSurveyStore {
    async fn find_survey(&self, survey_id: &str) -> Result<Option<Survey>, SurveyError> {
        let survey = sqlx::query_as::<_, Survey>(
            r#"
            SELECT id, title, created_at
            FROM survey.surveys
            WHERE id = $1
            "#,
        )
        .bind(survey_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(survey)
    }

    async fn upsert_survey(&self, survey_id: &str, title: &str) -> Result<Survey, SurveyError> {
        let survey = sqlx::query_as::<_, Survey>(
            r#"
            INSERT INTO survey.surveys (id, title)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE
            SET title = EXCLUDED.title
            RETURNING id, title, created_at
            "#,
        )
        .bind(survey_id)
        .bind(title)
        .fetch_one(&self.db)
        .await?;

        Ok(survey)
    }

    async fn insert_token(&self, token: NewQrToken) -> Result<QrToken, SurveyError> {
        // 23505 (unique_violation) se convierte en TokenCollision vía From<sqlx::Error>
        let record = sqlx::query_as::<_, QrToken>(
            r#"
            INSERT INTO survey.qr_tokens (
                id, token, survey_id, choice_id, expires_at, used, created_at
            )
            VALUES ($1, $2, $3, $4, $5, false, $6)
            RETURNING id, token, survey_id, choice_id, expires_at, used, created_at
            "#,
        )
        .bind(token.id)
        .bind(&token.token)
        .bind(&token.survey_id)
        .bind(token.choice_id)
        .bind(token.expires_at)
        .bind(token.created_at)
        .fetch_one(&self.db)
        .await?;

        Ok(record)
    }

    async fn find_token(&self, token: &str) -> Result<Option<TokenLookup>, SurveyError> {
        let lookup = sqlx::query_as::<_, TokenLookup>(
            r#"
            SELECT
                t.id,
                t.token,
                t.survey_id,
                t.choice_id,
                t.expires_at,
                t.used,
                t.created_at,
                EXISTS (
                    SELECT 1 FROM survey.responses r WHERE r.token_id = t.id
                ) AS has_response
            FROM survey.qr_tokens t
            WHERE t.token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?;

        Ok(lookup)
    }

    async fn redeem_token(
        &self,
        token_id: Uuid,
        redeemed_at: DateTime<Utc>,
    ) -> Result<Option<SurveyResponse>, SurveyError> {
        let mut tx = self.db.begin().await?;

        // Compare-and-set: sólo una transacción concurrente puede pasar used=false -> true
        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE survey.qr_tokens
            SET used = true
            WHERE id = $1
              AND used = false
            RETURNING id
            "#,
        )
        .bind(token_id)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let insert_res = sqlx::query_as::<_, SurveyResponse>(
            r#"
            INSERT INTO survey.responses (id, token_id, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, token_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(token_id)
        .bind(redeemed_at)
        .fetch_one(&mut *tx)
        .await;

        let response = match insert_res {
            Ok(response) => response,
            Err(e) => {
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.code().as_deref() == Some("23505") {
                        // Ya existía una respuesta para este token: no se toca `used`
                        tracing::warn!("Response already recorded for token {}, rolling back", token_id);
                        tx.rollback().await?;
                        return Ok(None);
                    }
                }
                return Err(SurveyError::Database(e.to_string()));
            }
        };

        tx.commit().await?;

        Ok(Some(response))
    }

    async fn ping(&self) -> Result<(), SurveyError> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}
