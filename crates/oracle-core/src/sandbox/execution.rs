//! Isolated script execution with a hard wall-clock timeout.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::decision::{parse_verdict, PayloadError, ScriptVerdict};
use super::error::{SandboxError, SandboxResult};

/// Configuration for sandboxed script execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter invoked as `<interpreter> <script-file>`.
    pub interpreter: String,
    /// Maximum wall-clock time for one run (seconds).
    pub timeout_secs: u64,
    /// Directory for the ephemeral script file (system temp dir when unset).
    pub work_dir: Option<PathBuf>,
    /// Suffix of the ephemeral script file.
    pub script_suffix: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            timeout_secs: 120,
            work_dir: None,
            script_suffix: ".py".to_string(),
        }
    }
}

impl SandboxConfig {
    pub fn validate(&self) -> SandboxResult<()> {
        if self.interpreter.trim().is_empty() {
            return Err(SandboxError::InvalidConfig("interpreter must not be empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(SandboxError::InvalidConfig("timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// Why a run did not produce a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFailure {
    NonZeroExit(Option<i32>),
    TimedOut { limit_secs: u64 },
    InvalidPayload(PayloadError),
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionFailure::NonZeroExit(Some(code)) => write!(f, "script exited with code {code}"),
            ExecutionFailure::NonZeroExit(None) => write!(f, "script terminated by signal"),
            ExecutionFailure::TimedOut { limit_secs } => {
                write!(f, "script exceeded {limit_secs}s wall-clock limit")
            }
            ExecutionFailure::InvalidPayload(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Decided(ScriptVerdict),
    Failed(ExecutionFailure),
}

/// Everything observed from one sandbox run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub outcome: ExecutionOutcome,
}

impl ExecutionResult {
    /// Classify raw process output.
    pub fn from_output(
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        duration_ms: u64,
    ) -> Self {
        let outcome = if exit_code != Some(0) {
            ExecutionOutcome::Failed(ExecutionFailure::NonZeroExit(exit_code))
        } else {
            match parse_verdict(&stdout) {
                Ok(verdict) => ExecutionOutcome::Decided(verdict),
                Err(e) => ExecutionOutcome::Failed(ExecutionFailure::InvalidPayload(e)),
            }
        };
        Self {
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
            exit_code,
            duration_ms,
            outcome,
        }
    }

    pub fn timed_out(limit_secs: u64) -> Self {
        Self {
            stdout: String::new(),
            stderr: "Execution timed out".to_string(),
            exit_code: None,
            duration_ms: limit_secs * 1000,
            outcome: ExecutionOutcome::Failed(ExecutionFailure::TimedOut { limit_secs }),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Decided(_))
    }

    pub fn verdict(&self) -> Option<&ScriptVerdict> {
        match &self.outcome {
            ExecutionOutcome::Decided(v) => Some(v),
            ExecutionOutcome::Failed(_) => None,
        }
    }

    /// Message fed back to the generator: stderr, else stdout, else the failure kind.
    pub fn error_message(&self) -> String {
        match &self.outcome {
            ExecutionOutcome::Decided(_) => String::new(),
            ExecutionOutcome::Failed(failure) => {
                if !self.stderr.is_empty() {
                    format!("{failure}\n{}", self.stderr)
                } else if !self.stdout.is_empty() {
                    format!("{failure}\n{}", self.stdout)
                } else {
                    failure.to_string()
                }
            }
        }
    }
}

/// Capability to run untrusted script source.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(&self, source: &str) -> SandboxResult<ExecutionResult>;
}

/// Runs each script as a separate OS process.
///
/// The script is written to an ephemeral file that is removed on every exit
/// path. If the returned future is dropped (timeout or shutdown), the child
/// process is killed.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    config: SandboxConfig,
}

impl ProcessExecutor {
    pub fn new(config: SandboxConfig) -> SandboxResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn stage(&self, source: &str) -> SandboxResult<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder
            .prefix("oracle-script-")
            .suffix(&self.config.script_suffix);
        let mut file = match &self.config.work_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(SandboxError::Staging)?;
        file.write_all(source.as_bytes())
            .map_err(SandboxError::Staging)?;
        file.flush().map_err(SandboxError::Staging)?;
        Ok(file)
    }
}

#[async_trait]
impl ScriptExecutor for ProcessExecutor {
    async fn execute(&self, source: &str) -> SandboxResult<ExecutionResult> {
        // Dropped (and unlinked) when this function returns or is cancelled.
        let script = self.stage(source)?;
        let start = Instant::now();

        let child = Command::new(&self.config.interpreter)
            .arg(script.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                interpreter: self.config.interpreter.clone(),
                source,
            })?;

        let limit = Duration::from_secs(self.config.timeout_secs);
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(waited) => waited.map_err(SandboxError::Wait)?,
            Err(_elapsed) => {
                tracing::warn!(
                    timeout_secs = self.config.timeout_secs,
                    "script exceeded wall-clock limit; killed"
                );
                return Ok(ExecutionResult::timed_out(self.config.timeout_secs));
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        Ok(ExecutionResult::from_output(
            output.status.code(),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
        ))
    }
}
