//! Error type shared by every module of the library.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the enrichment library.
///
/// Per-candidate provider failures never show up here: the verification client folds
/// them into a `VerificationResult` with `status = error`. What remains are failures
/// that stop a lead (validation, rate gate) or stop start-up (configuration, catalog).
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pattern catalog error: {0}")]
    Catalog(String),

    #[error("Invalid lead: {0}")]
    Validation(String),

    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Rate gate could not grant a slot within {0:?}")]
    RateGateTimeout(Duration),

    #[error("Rate gate worker is no longer running")]
    RateGateClosed,

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, AppError>;
