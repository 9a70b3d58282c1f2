//! Oracle Resolver Core Library
//!
//! Resolves on-chain yes/no price questions autonomously: sanitize the
//! question, have a model write a resolution script, check it statically,
//! run it in a sandboxed process and settle the outcome with a hash of the
//! evidence.
//!
//! External systems (the oracle contract, the code generator) are reached
//! through the traits in [`chain`] and [`generator`]; HTTP adapters live in
//! the `oracle-http` crate.

pub mod analysis;
pub mod backoff;
pub mod chain;
pub mod config;
pub mod domain;
pub mod evidence_store;
pub mod fakes;
pub mod generator;
pub mod obs;
pub mod pipeline;
pub mod prompt;
pub mod sandbox;
pub mod sanitize;
pub mod scheduler;
pub mod telemetry;
pub mod ttl;

pub use analysis::{analyze_script, Confidence, ScriptAnalysis};
pub use backoff::{FailureStage, FailureState, FailureTracker};
pub use chain::{
    ChainError, ChainResult, RequestSource, SettlementCall, SettlementQueue, SettlementReceipt,
    SettlementSink,
};
pub use config::ResolverConfig;
pub use domain::{
    Bytes32, Decision, Evidence, EvidenceDecision, ExecutionTrace, PendingRequest, RequestId,
    ResolverError, Result, SettledEvidence, SettlementError, ValidationError,
};
pub use evidence_store::{EvidenceError, EvidenceStore, FsEvidenceStore};
pub use generator::{CodeGenerator, GenerationContext, GenerationError, PreviousAttempt};
pub use pipeline::{PipelineConfig, PipelinePhase, PreparedScript, ResolutionPipeline};
pub use prompt::build_resolution_task;
pub use sandbox::{
    ExecutionResult, ProcessExecutor, SandboxConfig, SandboxError, ScriptExecutor, ScriptVerdict,
};
pub use sanitize::{restore_placeholders, sanitize_ancillary, Placeholder, SanitizedText};
pub use scheduler::{ManualSettlement, SchedulerBuilder, SettlementRecord, SettlementScheduler};
pub use telemetry::init_tracing;
pub use ttl::TtlSet;
