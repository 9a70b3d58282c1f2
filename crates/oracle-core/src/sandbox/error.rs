//! Error types for the sandbox module.

/// Infrastructure failures of the executor itself.
///
/// A script that exits non-zero, times out or prints no decision is not an
/// error here; it yields a failed [`super::ExecutionResult`] instead.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to stage script: {0}")]
    Staging(#[source] std::io::Error),

    #[error("failed to spawn interpreter {interpreter}: {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to collect script output: {0}")]
    Wait(#[source] std::io::Error),

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
