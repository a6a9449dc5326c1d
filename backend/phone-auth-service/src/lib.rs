/// Phone Auth Service Library
///
/// Passwordless login by SMS one-time code, with throttling, delivery audit,
/// a captcha gate and rotating refresh tokens.
///
/// ## Modules
///
/// - `app`: Wiring of stores and services
/// - `clock`: Injectable time source
/// - `config`: Service configuration
/// - `db`: OTP, delivery log, refresh token and user stores (PostgreSQL / in-memory)
/// - `error`: Error types and HTTP mapping
/// - `http`: axum router, extractors and handlers
/// - `i18n`: User-facing message catalog
/// - `models`: Data models
/// - `security`: Rate limiting and keyed code hashing
/// - `services`: OTP policy, SMS delivery, captcha, tokens, login flow
/// - `validators`: Input validation
pub mod app;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod i18n;
pub mod models;
pub mod security;
pub mod services;
pub mod validators;

// Re-export commonly used types
pub use error::{AuthError, Result};
