//! Domain model for oracle resolution.
//!
//! - [`request`] : `Bytes32`, `RequestId`, `PendingRequest`
//! - [`evidence`]: `Decision`, `Evidence`, `SettledEvidence`
//! - [`digest`]  : canonical JSON and Keccak-256 evidence hashing
//! - [`error`]   : `ResolverError` taxonomy

pub mod digest;
pub mod error;
pub mod evidence;
pub mod request;

pub use digest::{canonical_json, keccak256, keccak_digest, sha256_hex};
pub use error::{ResolverError, Result, SettlementError, ValidationError};
pub use evidence::{Decision, Evidence, EvidenceDecision, ExecutionTrace, SettledEvidence};
pub use request::{decode_ancillary, Bytes32, PendingRequest, RequestId};
