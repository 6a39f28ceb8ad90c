pub mod catalog;
pub mod models;
pub mod pg_store;
pub mod qr_generator;
pub mod store;
pub mod token_service;

// Re-exports para facilitar imports
pub use catalog::{Choice, SurveyCatalog, SurveyDefinition};
pub use models::*;
pub use pg_store::PgSurveyStore;
pub use qr_generator::{normalize_phone, QrConfig, QrGenerator};
pub use store::{MemorySurveyStore, SurveyStore};
pub use token_service::TokenService;
