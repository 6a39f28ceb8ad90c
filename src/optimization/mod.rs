// Pool de Postgres ajustado desde la configuración
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::info;

/// Database connection pool tuning
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::from(&shared::config::DatabaseConfig::default())
    }
}

impl From<&shared::config::DatabaseConfig> for DatabaseConfig {
    fn from(config: &shared::config::DatabaseConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            acquire_timeout: Duration::from_secs(config.acquire_timeout_seconds), // fail fast
            idle_timeout: Duration::from_secs(config.idle_timeout_seconds),
            max_lifetime: Duration::from_secs(config.max_lifetime_seconds),
        }
    }
}

/// Create optimized database pool
pub async fn create_optimized_db_pool(
    database_url: &str,
    config: DatabaseConfig,
) -> Result<PgPool, sqlx::Error> {
    info!(
        "🔧 Creating database pool ({}..={} connections)",
        config.min_connections, config.max_connections
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    info!("✅ Database pool created successfully");
    Ok(pool)
}
