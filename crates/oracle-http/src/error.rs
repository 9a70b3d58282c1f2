//! Error types for oracle-http

use thiserror::Error;

/// Adapter construction errors. Runtime failures surface as
/// `GenerationError` / `ChainError` through the core traits.
#[derive(Error, Debug)]
pub enum HttpError {
    /// A required environment variable is unset or blank
    #[error("missing required setting: {0}")]
    MissingSetting(&'static str),

    /// An environment variable could not be parsed
    #[error("invalid value for {key}: {value:?}")]
    InvalidSetting { key: &'static str, value: String },

    /// The HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
