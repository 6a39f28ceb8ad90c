use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::catalog::SurveyCatalog;
use super::models::{
    IssueTokenRequest, IssuedToken, NewQrToken, RedeemOutcome, Redemption, Survey, SurveyError,
};
use super::qr_generator::QrGenerator;
use super::store::SurveyStore;
use crate::observability::metrics::{
    record_redemption_outcome, record_token_issued, TOKEN_OPERATION_DURATION,
};

/// Reintentos ante colisión de token (prácticamente imposible con 128 bits)
const MAX_TOKEN_ATTEMPTS: usize = 5;

/// Longitud máxima aceptada para un token en la ruta de redención
const MAX_TOKEN_LEN: usize = 128;

/// Servicio de emisión y redención de tokens de un solo uso
pub struct TokenService {
    store: Arc<dyn SurveyStore>,
    catalog: Arc<SurveyCatalog>,
    qr_generator: Arc<QrGenerator>,
}

impl TokenService {
    pub fn new(
        store: Arc<dyn SurveyStore>,
        catalog: Arc<SurveyCatalog>,
        qr_generator: Arc<QrGenerator>,
    ) -> Self {
        Self {
            store,
            catalog,
            qr_generator,
        }
    }

    pub fn catalog(&self) -> &SurveyCatalog {
        &self.catalog
    }

    /// Upsert explícito de todas las encuestas del catálogo (arranque)
    pub async fn provision_catalog(&self) -> Result<usize, SurveyError> {
        for survey in self.catalog.surveys() {
            self.store.upsert_survey(&survey.id, &survey.title).await?;
        }
        Ok(self.catalog.surveys().len())
    }

    pub async fn issue_token(&self, request: IssueTokenRequest) -> Result<IssuedToken, SurveyError> {
        self.issue_token_at(request, Utc::now()).await
    }

    /// Emite un token: valida, resuelve la encuesta, genera y persiste
    pub async fn issue_token_at(
        &self,
        request: IssueTokenRequest,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, SurveyError> {
        let start_time = std::time::Instant::now();

        let result = self.try_issue(request, now).await;

        record_token_issued(result.is_ok());
        TOKEN_OPERATION_DURATION
            .with_label_values(&["issue_token"])
            .observe(start_time.elapsed().as_secs_f64());

        result
    }

    async fn try_issue(
        &self,
        request: IssueTokenRequest,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, SurveyError> {
        // 1. Validar entrada
        let survey_id = request
            .survey_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SurveyError::InvalidInput("surveyId y choiceId son obligatorios".to_string()))?
            .to_string();

        let choice_id = request
            .choice_id
            .ok_or_else(|| SurveyError::InvalidInput("surveyId y choiceId son obligatorios".to_string()))?;

        if !self.catalog.accepts_choice(&survey_id, choice_id) {
            return Err(SurveyError::InvalidInput(format!(
                "choiceId debe ser una de las opciones {}",
                self.catalog.choice_range_label(&survey_id)
            )));
        }
        // accepts_choice garantiza 1..=i32::MAX
        let choice_id = i32::try_from(choice_id)
            .map_err(|_| SurveyError::InvalidInput("choiceId fuera de rango".to_string()))?;

        // 2. Resolver encuesta (la reservada se aprovisiona si falta)
        let survey = self.resolve_survey(&survey_id).await?;

        // 3. Generar y persistir token
        let expires_at = self.qr_generator.calculate_expiration(now)?;

        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let new_token = NewQrToken {
                id: Uuid::new_v4(),
                token: self.qr_generator.generate_token(),
                survey_id: survey.id.clone(),
                choice_id,
                expires_at,
                created_at: now,
            };

            match self.store.insert_token(new_token).await {
                Ok(record) => {
                    let url = self.qr_generator.redemption_path(&record.token);
                    tracing::info!(
                        "Issued token for survey_id={} choice_id={} expires_at={}",
                        record.survey_id,
                        record.choice_id,
                        record.expires_at
                    );
                    return Ok(IssuedToken {
                        token: record.token,
                        survey_id: record.survey_id,
                        choice_id: record.choice_id,
                        expires_at: record.expires_at,
                        url,
                    });
                }
                Err(SurveyError::TokenCollision) => {
                    tracing::warn!("Token collision on attempt {}/{}. Retrying...", attempt, MAX_TOKEN_ATTEMPTS);
                    continue;
                }
                Err(e) => {
                    tracing::error!("Failed to persist token for survey_id={}: {}", survey.id, e);
                    return Err(e);
                }
            }
        }

        Err(SurveyError::TokenCollision)
    }

    async fn resolve_survey(&self, survey_id: &str) -> Result<Survey, SurveyError> {
        if let Some(survey) = self.store.find_survey(survey_id).await? {
            return Ok(survey);
        }

        if !self.catalog.is_reserved(survey_id) {
            return Err(SurveyError::SurveyNotFound(survey_id.to_string()));
        }

        let definition = self.catalog.reserved_survey().ok_or_else(|| {
            SurveyError::Internal(format!("reserved survey {} missing from catalog", survey_id))
        })?;

        tracing::info!("Provisioning reserved survey '{}'", survey_id);
        self.store.upsert_survey(&definition.id, &definition.title).await
    }

    pub async fn redeem_token(&self, token: &str) -> Result<RedeemOutcome, SurveyError> {
        self.redeem_token_at(token, Utc::now()).await
    }

    /// Redime un token. Orden de evaluación: no existe → ya usado → expirado → redimir.
    pub async fn redeem_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, SurveyError> {
        let start_time = std::time::Instant::now();

        let result = self.try_redeem(token, now).await;

        match &result {
            Ok(outcome) => record_redemption_outcome(outcome.as_str()),
            Err(_) => record_redemption_outcome("error"),
        }
        TOKEN_OPERATION_DURATION
            .with_label_values(&["redeem_token"])
            .observe(start_time.elapsed().as_secs_f64());

        result
    }

    async fn try_redeem(&self, token: &str, now: DateTime<Utc>) -> Result<RedeemOutcome, SurveyError> {
        if !looks_like_token(token) {
            tracing::warn!("Rejected malformed token ({} chars)", token.len());
            return Ok(RedeemOutcome::NotFound);
        }

        // 1. Buscar
        let lookup = match self.store.find_token(token).await? {
            Some(lookup) => lookup,
            None => {
                tracing::info!("Token not found");
                return Ok(RedeemOutcome::NotFound);
            }
        };

        // 2. Ya usado
        if lookup.is_consumed() {
            tracing::warn!("Token {} already used", lookup.token.id);
            return Ok(RedeemOutcome::AlreadyUsed);
        }

        // 3. Expirado
        if lookup.token.is_expired_at(now) {
            tracing::warn!("Token {} expired at {}", lookup.token.id, lookup.token.expires_at);
            return Ok(RedeemOutcome::Expired {
                expired_at: lookup.token.expires_at,
            });
        }

        // 4. Marcar usado + registrar respuesta en una sola transacción
        let response = match self.store.redeem_token(lookup.token.id, now).await {
            Ok(Some(response)) => response,
            Ok(None) => {
                tracing::warn!("Token {} consumed by a concurrent redemption", lookup.token.id);
                return Ok(RedeemOutcome::AlreadyUsed);
            }
            Err(e) => {
                tracing::error!("Failed to redeem token {}: {}", lookup.token.id, e);
                return Err(e);
            }
        };

        let mut redeemed = lookup.token;
        redeemed.used = true;

        let choice = self
            .catalog
            .choice(&redeemed.survey_id, i64::from(redeemed.choice_id))
            .cloned();

        tracing::info!(
            "Token {} redeemed: survey_id={} choice_id={}",
            redeemed.id,
            redeemed.survey_id,
            redeemed.choice_id
        );

        Ok(RedeemOutcome::Redeemed(Redemption {
            token: redeemed,
            response,
            choice,
        }))
    }
}

fn looks_like_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::survey::qr_generator::QrConfig;
    use crate::domains::survey::store::MemorySurveyStore;
    use async_trait::async_trait;
    use chrono::Duration;

    fn service_with(store: Arc<dyn SurveyStore>) -> TokenService {
        TokenService::new(
            store,
            Arc::new(SurveyCatalog::demo("demo")),
            Arc::new(QrGenerator::new(QrConfig::default())),
        )
    }

    fn request(survey_id: &str, choice_id: i64) -> IssueTokenRequest {
        IssueTokenRequest {
            survey_id: Some(survey_id.to_string()),
            choice_id: Some(choice_id),
        }
    }

    fn token_of(issued: &IssuedToken) -> &str {
        issued.url.trim_start_matches("/s/")
    }

    #[tokio::test]
    async fn test_issue_and_redeem_every_choice() {
        let service = service_with(Arc::new(MemorySurveyStore::new()));

        for choice_id in 1..=4 {
            let issued = service.issue_token(request("demo", choice_id)).await.unwrap();
            assert_eq!(issued.url, format!("/s/{}", issued.token));

            match service.redeem_token(token_of(&issued)).await.unwrap() {
                RedeemOutcome::Redeemed(redemption) => {
                    assert_eq!(redemption.token.choice_id as i64, choice_id);
                    assert_eq!(redemption.choice.unwrap().id as i64, choice_id);
                    assert_eq!(redemption.response.token_id, redemption.token.id);
                    assert!(redemption.token.used);
                }
                other => panic!("expected Redeemed, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_demo_scenario_second_visit_is_already_used() {
        let store = Arc::new(MemorySurveyStore::new());
        let service = service_with(store.clone());

        let issued = service.issue_token(request("demo", 2)).await.unwrap();

        let first = service.redeem_token(token_of(&issued)).await.unwrap();
        let redemption = match first {
            RedeemOutcome::Redeemed(r) => r,
            other => panic!("expected Redeemed, got {:?}", other),
        };
        assert_eq!(redemption.token.choice_id, 2);
        assert!(store.response_for(redemption.token.id).is_some());

        for _ in 0..3 {
            let again = service.redeem_token(token_of(&issued)).await.unwrap();
            assert!(matches!(again, RedeemOutcome::AlreadyUsed));
        }
        assert_eq!(store.response_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_refused_without_mutation() {
        let store = Arc::new(MemorySurveyStore::new());
        let service = service_with(store.clone());

        let issued = service.issue_token(request("demo", 1)).await.unwrap();
        let later = issued.expires_at + Duration::seconds(1);

        let outcome = service.redeem_token_at(token_of(&issued), later).await.unwrap();
        assert!(matches!(outcome, RedeemOutcome::Expired { .. }));

        let lookup = store.find_token(token_of(&issued)).await.unwrap().unwrap();
        assert!(!lookup.token.used);
        assert_eq!(store.response_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_expiry_fails_without_panicking() {
        let store = Arc::new(MemorySurveyStore::new());
        let service = TokenService::new(
            store.clone(),
            Arc::new(SurveyCatalog::demo("demo")),
            Arc::new(QrGenerator::new(QrConfig {
                expiration_hours: 10_000_000_000,
                ..QrConfig::default()
            })),
        );

        let err = service.issue_token(request("demo", 1)).await.unwrap_err();
        assert!(matches!(err, SurveyError::Internal(_)));
        assert_eq!(store.token_count(), 0);
    }

    #[tokio::test]
    async fn test_token_valid_exactly_at_expiry() {
        let service = service_with(Arc::new(MemorySurveyStore::new()));
        let issued = service.issue_token(request("demo", 3)).await.unwrap();

        let outcome = service
            .redeem_token_at(token_of(&issued), issued.expires_at)
            .await
            .unwrap();
        assert!(matches!(outcome, RedeemOutcome::Redeemed(_)));
    }

    #[tokio::test]
    async fn test_used_and_expired_reports_already_used() {
        let service = service_with(Arc::new(MemorySurveyStore::new()));
        let issued = service.issue_token(request("demo", 1)).await.unwrap();

        service.redeem_token(token_of(&issued)).await.unwrap();

        let later = issued.expires_at + Duration::days(1);
        let outcome = service.redeem_token_at(token_of(&issued), later).await.unwrap();
        assert!(matches!(outcome, RedeemOutcome::AlreadyUsed));
    }

    #[tokio::test]
    async fn test_invalid_choice_ids() {
        let service = service_with(Arc::new(MemorySurveyStore::new()));

        for choice_id in [0, 5, -1, i64::from(i32::MAX) + 1] {
            let err = service.issue_token(request("demo", choice_id)).await.unwrap_err();
            assert!(matches!(err, SurveyError::InvalidInput(_)), "choice {choice_id}");
        }
    }

    #[tokio::test]
    async fn test_missing_fields_are_invalid_input() {
        let service = service_with(Arc::new(MemorySurveyStore::new()));

        let missing_survey = IssueTokenRequest {
            survey_id: None,
            choice_id: Some(1),
        };
        let blank_survey = IssueTokenRequest {
            survey_id: Some("   ".to_string()),
            choice_id: Some(1),
        };
        let missing_choice = IssueTokenRequest {
            survey_id: Some("demo".to_string()),
            choice_id: None,
        };

        for req in [missing_survey, blank_survey, missing_choice] {
            let err = service.issue_token(req).await.unwrap_err();
            assert!(matches!(err, SurveyError::InvalidInput(_)));
        }
    }

    #[tokio::test]
    async fn test_unknown_survey_is_not_found() {
        let service = service_with(Arc::new(MemorySurveyStore::new()));

        let err = service.issue_token(request("no-existe", 1)).await.unwrap_err();
        assert!(matches!(err, SurveyError::SurveyNotFound(id) if id == "no-existe"));
    }

    #[tokio::test]
    async fn test_existing_non_demo_survey_accepts_default_range() {
        let store = Arc::new(MemorySurveyStore::new());
        store.upsert_survey("feria", "Feria del libro").await.unwrap();
        let service = service_with(store);

        let issued = service.issue_token(request("feria", 4)).await.unwrap();
        assert_eq!(issued.survey_id, "feria");

        match service.redeem_token(token_of(&issued)).await.unwrap() {
            RedeemOutcome::Redeemed(r) => assert!(r.choice.is_none()),
            other => panic!("expected Redeemed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_demo_survey_is_provisioned_once() {
        let store = Arc::new(MemorySurveyStore::new());
        let service = service_with(store.clone());

        assert!(store.find_survey("demo").await.unwrap().is_none());
        service.issue_token(request("demo", 1)).await.unwrap();
        let created = store.find_survey("demo").await.unwrap().unwrap();

        service.issue_token(request("demo", 2)).await.unwrap();
        let again = store.find_survey("demo").await.unwrap().unwrap();
        assert_eq!(created, again);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_tokens_are_not_found() {
        let service = service_with(Arc::new(MemorySurveyStore::new()));
        let too_long = "a".repeat(200);

        for token in ["", "ffffffffffffffffffffffffffffffff", "../etc/passwd", too_long.as_str()] {
            let outcome = service.redeem_token(token).await.unwrap();
            assert!(matches!(outcome, RedeemOutcome::NotFound), "token {token:?}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redemptions_only_one_wins() {
        let service = Arc::new(service_with(Arc::new(MemorySurveyStore::new())));
        let issued = service.issue_token(request("demo", 2)).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let service = service.clone();
                let token = issued.token.clone();
                tokio::spawn(async move { service.redeem_token(&token).await.unwrap() })
            })
            .collect();

        let mut redeemed = 0;
        let mut already_used = 0;
        for handle in handles {
            match handle.await.unwrap() {
                RedeemOutcome::Redeemed(_) => redeemed += 1,
                RedeemOutcome::AlreadyUsed => already_used += 1,
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        assert_eq!(redeemed, 1);
        assert_eq!(already_used, 15);
    }

    /// Store que falla en escrituras para verificar que no queda estado parcial
    struct FailingStore {
        inner: MemorySurveyStore,
        fail_insert: bool,
        collisions_before_success: parking_lot::Mutex<usize>,
    }

    #[async_trait]
    impl SurveyStore for FailingStore {
        async fn find_survey(&self, survey_id: &str) -> Result<Option<Survey>, SurveyError> {
            self.inner.find_survey(survey_id).await
        }

        async fn upsert_survey(&self, survey_id: &str, title: &str) -> Result<Survey, SurveyError> {
            self.inner.upsert_survey(survey_id, title).await
        }

        async fn insert_token(&self, token: NewQrToken) -> Result<crate::domains::survey::models::QrToken, SurveyError> {
            if self.fail_insert {
                return Err(SurveyError::Database("connection reset".to_string()));
            }
            {
                let mut remaining = self.collisions_before_success.lock();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SurveyError::TokenCollision);
                }
            }
            self.inner.insert_token(token).await
        }

        async fn find_token(
            &self,
            token: &str,
        ) -> Result<Option<crate::domains::survey::models::TokenLookup>, SurveyError> {
            self.inner.find_token(token).await
        }

        async fn redeem_token(
            &self,
            _token_id: Uuid,
            _redeemed_at: DateTime<Utc>,
        ) -> Result<Option<crate::domains::survey::models::SurveyResponse>, SurveyError> {
            Err(SurveyError::Database("serialization failure".to_string()))
        }

        async fn ping(&self) -> Result<(), SurveyError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_insert_failure_is_internal_and_leaves_nothing() {
        let store = Arc::new(FailingStore {
            inner: MemorySurveyStore::new(),
            fail_insert: true,
            collisions_before_success: parking_lot::Mutex::new(0),
        });
        let service = service_with(store.clone());

        let err = service.issue_token(request("demo", 1)).await.unwrap_err();
        assert!(matches!(err, SurveyError::Database(_)));
        assert_eq!(store.inner.token_count(), 0);
    }

    #[tokio::test]
    async fn test_collisions_are_retried() {
        let store = Arc::new(FailingStore {
            inner: MemorySurveyStore::new(),
            fail_insert: false,
            collisions_before_success: parking_lot::Mutex::new(MAX_TOKEN_ATTEMPTS - 1),
        });
        let service = service_with(store.clone());

        service.issue_token(request("demo", 1)).await.unwrap();
        assert_eq!(store.inner.token_count(), 1);
    }

    #[tokio::test]
    async fn test_persistent_collisions_give_up() {
        let store = Arc::new(FailingStore {
            inner: MemorySurveyStore::new(),
            fail_insert: false,
            collisions_before_success: parking_lot::Mutex::new(MAX_TOKEN_ATTEMPTS),
        });
        let service = service_with(store);

        let err = service.issue_token(request("demo", 1)).await.unwrap_err();
        assert!(matches!(err, SurveyError::TokenCollision));
    }

    #[tokio::test]
    async fn test_redeem_write_failure_keeps_token_unused() {
        let store = Arc::new(FailingStore {
            inner: MemorySurveyStore::new(),
            fail_insert: false,
            collisions_before_success: parking_lot::Mutex::new(0),
        });
        let service = service_with(store.clone());

        let issued = service.issue_token(request("demo", 1)).await.unwrap();
        let err = service.redeem_token(token_of(&issued)).await.unwrap_err();
        assert!(matches!(err, SurveyError::Database(_)));

        let lookup = store.inner.find_token(token_of(&issued)).await.unwrap().unwrap();
        assert!(!lookup.token.used);
        assert!(!lookup.has_response);
    }

    #[tokio::test]
    async fn test_provision_catalog_upserts_every_survey() {
        let store = Arc::new(MemorySurveyStore::new());
        let service = service_with(store.clone());

        assert_eq!(service.provision_catalog().await.unwrap(), 1);
        let demo = store.find_survey("demo").await.unwrap().unwrap();
        assert_eq!(demo.title, "Elige la foto que más te guste");
    }
}
