use crate::domains::survey::{
    MemorySurveyStore, PgSurveyStore, QrConfig, QrGenerator, SurveyCatalog, SurveyStore,
    TokenService,
};
use crate::optimization::{create_optimized_db_pool, DatabaseConfig};
use crate::security::{RateLimitConfig, RateLimiter};
use anyhow::Context;
use shared::Config;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// Estado compartido de la aplicación.
/// Store, catálogo y generador se comparten entre todos los handlers.
pub struct AppState {
    pub config: Config,
    pub catalog: Arc<SurveyCatalog>,
    pub store: Arc<dyn SurveyStore>,
    pub qr_generator: Arc<QrGenerator>,
    pub token_service: Arc<TokenService>,
    pub rate_limiter: RateLimiter,
    /// Sólo presente con el store de Postgres
    pub db_pool: Option<PgPool>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let catalog = match &config.survey.catalog_path {
            Some(path) => {
                let catalog = SurveyCatalog::from_file(&config.survey.demo_survey_id, path)?;
                tracing::info!("📚 Survey catalog loaded from {} ({} surveys)", path, catalog.surveys().len());
                catalog
            }
            None => SurveyCatalog::demo(&config.survey.demo_survey_id),
        };

        let (store, db_pool): (Arc<dyn SurveyStore>, Option<PgPool>) = match &config.database.url {
            Some(database_url) => {
                let db_config = DatabaseConfig::from(&config.database);
                let pool = create_optimized_db_pool(database_url, db_config)
                    .await
                    .context("Failed to connect to DATABASE_URL")?;

                if config.database.run_migrations {
                    sqlx::migrate!("./migrations")
                        .run(&pool)
                        .await
                        .context("Failed to run database migrations")?;
                    tracing::info!("✅ Database migrations applied");
                }

                (Arc::new(PgSurveyStore::new(pool.clone())), Some(pool))
            }
            None => {
                if config.is_production() {
                    anyhow::bail!("DATABASE_URL must be set in production");
                }
                tracing::warn!("⚠️ DATABASE_URL not set. Using in-memory store; data is lost on restart.");
                (Arc::new(MemorySurveyStore::new()), None)
            }
        };

        let state = Self::with_store(config, catalog, store, db_pool);

        let provisioned = state
            .token_service
            .provision_catalog()
            .await
            .context("Failed to provision survey catalog")?;
        tracing::info!("✅ {} catalog surveys provisioned", provisioned);

        Ok(state)
    }

    /// Arma el estado sobre un store ya construido (sin aprovisionar)
    pub fn with_store(
        config: Config,
        catalog: SurveyCatalog,
        store: Arc<dyn SurveyStore>,
        db_pool: Option<PgPool>,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let qr_generator = Arc::new(QrGenerator::new(QrConfig::from_app_config(&config)));
        let token_service = Arc::new(TokenService::new(
            store.clone(),
            catalog.clone(),
            qr_generator.clone(),
        ));
        let rate_limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: u32::try_from(config.app.rate_limit_per_minute).unwrap_or(u32::MAX),
            window_size: Duration::from_secs(60),
            trust_proxy_headers: config.app.trust_proxy_headers,
        });

        Self {
            config,
            catalog,
            store,
            qr_generator,
            token_service,
            rate_limiter,
            db_pool,
        }
    }

    /// Estado en memoria con el catálogo demo
    pub fn in_memory(config: Config) -> Self {
        let catalog = SurveyCatalog::demo(&config.survey.demo_survey_id);
        Self::with_store(config, catalog, Arc::new(MemorySurveyStore::new()), None)
    }
}
