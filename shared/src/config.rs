//! Configuration management for the survey QR service

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::str::FromStr;

/// Tope de validez de un token: un año
pub const MAX_TOKEN_EXPIRY_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub survey: SurveyConfig,
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    /// Horas de validez de un token desde su emisión
    pub token_expiry_hours: i64,
    /// Encuesta reservada que se aprovisiona automáticamente
    pub demo_survey_id: String,
    /// JSON opcional con el catálogo de encuestas y opciones
    pub catalog_path: Option<String>,
    /// Tamaño del QR en píxeles
    pub qr_size_px: u32,
    /// Texto del SMS; la URL de redención se agrega al final
    pub sms_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub log_level: String,
    pub port: u16,
    /// Base absoluta usada para construir los enlaces que viajan en el SMS
    pub public_base_url: String,
    pub max_request_size_kb: usize,
    pub rate_limit_per_minute: usize,
    /// Sólo detrás de un reverse proxy propio
    pub trust_proxy_headers: bool,
    /// Orígenes extra (CDN) desde donde las páginas pueden cargar imágenes
    pub image_origins: Vec<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 2,
            acquire_timeout_seconds: 5,
            idle_timeout_seconds: 300,
            max_lifetime_seconds: 1800,
            run_migrations: true,
        }
    }
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            token_expiry_hours: 24,
            demo_survey_id: "demo".to_string(),
            catalog_path: None,
            qr_size_px: 512,
            sms_message: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_level: "info".to_string(),
            port: 8000,
            public_base_url: "http://localhost:8000".to_string(),
            max_request_size_kb: 64,
            rate_limit_per_minute: 60,
            trust_proxy_headers: false,
            image_origins: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            survey: SurveyConfig::default(),
            app: AppConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        Ok(Config {
            database: DatabaseConfig {
                url: optional_var("DATABASE_URL"),
                max_connections: parse_var("DATABASE_MAX_CONNECTIONS", defaults.database.max_connections)?,
                min_connections: parse_var("DATABASE_MIN_CONNECTIONS", defaults.database.min_connections)?,
                acquire_timeout_seconds: parse_var(
                    "DATABASE_ACQUIRE_TIMEOUT_SECONDS",
                    defaults.database.acquire_timeout_seconds,
                )?,
                idle_timeout_seconds: parse_var(
                    "DATABASE_IDLE_TIMEOUT_SECONDS",
                    defaults.database.idle_timeout_seconds,
                )?,
                max_lifetime_seconds: parse_var(
                    "DATABASE_MAX_LIFETIME_SECONDS",
                    defaults.database.max_lifetime_seconds,
                )?,
                run_migrations: parse_var("RUN_MIGRATIONS", defaults.database.run_migrations)?,
            },
            survey: SurveyConfig {
                token_expiry_hours: parse_var("TOKEN_EXPIRY_HOURS", defaults.survey.token_expiry_hours)?,
                demo_survey_id: env::var("DEMO_SURVEY_ID").unwrap_or(defaults.survey.demo_survey_id),
                catalog_path: optional_var("SURVEY_CATALOG_PATH"),
                qr_size_px: parse_var("QR_SIZE_PX", defaults.survey.qr_size_px)?,
                sms_message: optional_var("SMS_MESSAGE"),
            },
            app: AppConfig {
                environment: env::var("ENVIRONMENT").unwrap_or(defaults.app.environment),
                log_level: env::var("RUST_LOG").unwrap_or(defaults.app.log_level),
                port: parse_var("PORT", defaults.app.port)?,
                public_base_url: env::var("PUBLIC_BASE_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or(defaults.app.public_base_url),
                max_request_size_kb: parse_var("MAX_REQUEST_SIZE_KB", defaults.app.max_request_size_kb)?,
                rate_limit_per_minute: parse_var("RATE_LIMIT_PER_MINUTE", defaults.app.rate_limit_per_minute)?,
                trust_proxy_headers: parse_var("TRUST_PROXY_HEADERS", defaults.app.trust_proxy_headers)?,
                image_origins: optional_var("IMAGE_ORIGINS")
                    .map(|raw| split_list(&raw))
                    .unwrap_or(defaults.app.image_origins),
            },
        })
        .and_then(Config::validated)
    }

    fn validated(self) -> anyhow::Result<Self> {
        if self.survey.token_expiry_hours <= 0 {
            anyhow::bail!("TOKEN_EXPIRY_HOURS must be positive");
        }
        if self.survey.token_expiry_hours > MAX_TOKEN_EXPIRY_HOURS {
            anyhow::bail!("TOKEN_EXPIRY_HOURS must not exceed {}", MAX_TOKEN_EXPIRY_HOURS);
        }
        if self.survey.demo_survey_id.trim().is_empty() {
            anyhow::bail!("DEMO_SURVEY_ID must not be empty");
        }
        if let Some(origin) = self.app.image_origins.iter().find(|o| !is_plain_origin(o)) {
            anyhow::bail!("IMAGE_ORIGINS contains an invalid origin: {}", origin);
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!("DATABASE_MIN_CONNECTIONS exceeds DATABASE_MAX_CONNECTIONS");
        }
        Ok(self)
    }

    pub fn is_production(&self) -> bool {
        self.app.environment == "production"
    }

}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().trim_end_matches('/').to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// `https://cdn.example.com[:puerto]`, sin ruta ni caracteres que rompan el CSP
fn is_plain_origin(origin: &str) -> bool {
    let rest = match origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"))
    {
        Some(rest) => rest,
        None => return false,
    };
    !rest.is_empty()
        && rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
}

fn parse_var<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| anyhow::anyhow!("{e}"))
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}
