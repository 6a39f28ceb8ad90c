//! Shared library for the survey QR services
//!
//! - Environment-driven configuration
//! - HTTP error envelope

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, ErrorResponse};
