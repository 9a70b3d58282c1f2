//! Resolver-level error taxonomy.

use super::request::RequestId;
use crate::chain::ChainError;
use crate::evidence_store::EvidenceError;
use crate::generator::GenerationError;

/// Errors produced while validating identifiers and configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid bytes32 value: {0}")]
    InvalidBytes32(String),

    #[error("non-finite number in canonical payload: {0}")]
    NonFiniteNumber(String),

    #[error("cannot canonicalize payload: {0}")]
    Canonicalization(String),
}

/// Settlement submission failures. Never retried within a cycle.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("settlement submission failed: {0}")]
    Submission(#[from] ChainError),

    #[error("settlement transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },
}

/// Resolver errors.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// The external generator call itself failed; not retried for this request in this cycle.
    #[error("code generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("script analysis failed after {attempts} attempt(s): {issue}")]
    Analysis { attempts: u32, issue: String },

    #[error("script execution failed after {attempts} attempt(s): {reason}")]
    Execution { attempts: u32, reason: String },

    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("evidence error: {0}")]
    Evidence(#[from] EvidenceError),

    #[error("request {0} is already settled")]
    AlreadySettled(RequestId),

    #[error("missing required configuration: {0}")]
    MissingConfig(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResolverError {
    /// Whether this failure should count against the request's backoff budget.
    pub fn counts_as_resolution_failure(&self) -> bool {
        matches!(
            self,
            ResolverError::Generation(_)
                | ResolverError::Analysis { .. }
                | ResolverError::Execution { .. }
        )
    }
}

/// Result type for resolver operations.
pub type Result<T> = std::result::Result<T, ResolverError>;
