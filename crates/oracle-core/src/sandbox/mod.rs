//! Sandbox: isolated execution of generated resolution scripts.
//!
//! Each script runs as its own interpreter process with a hard wall-clock
//! limit. Its decision is read from the last JSON line on stdout.
//!
//! # Modules
//!
//! - [`execution`]: `SandboxConfig`, `ScriptExecutor`, `ProcessExecutor`
//! - [`decision`] : stdout payload extraction and `ScriptVerdict`
//! - [`debug`]    : failed-run artifacts for operators
//! - [`error`]    : `SandboxError` / `SandboxResult`

pub mod debug;
pub mod decision;
pub mod error;
pub mod execution;

pub use debug::{persist_debug_artifacts, DebugArtifacts};
pub use decision::{extract_json_payload, parse_verdict, PayloadError, ScriptVerdict};
pub use error::{SandboxError, SandboxResult};
pub use execution::{
    ExecutionFailure, ExecutionOutcome, ExecutionResult, ProcessExecutor, SandboxConfig,
    ScriptExecutor,
};
