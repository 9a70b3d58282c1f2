//! Resolver configuration.
//!
//! Precedence, lowest first: built-in defaults, an optional TOML file,
//! `ORACLE_*` environment variables. Binaries apply CLI flags on top.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::{ResolverError, Result};
use crate::pipeline::PipelineConfig;
use crate::sandbox::SandboxConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Seconds between poll cycles.
    pub poll_interval_secs: u64,
    /// Extra seconds after a request's deadline before it may be settled.
    pub settlement_grace_secs: u64,
    pub max_prepare_attempts: u32,
    pub max_execution_attempts: u32,
    /// Consecutive failures before a request is backed off.
    pub max_failures: u32,
    pub failure_backoff_secs: u64,
    /// How long a just-settled request is suppressed.
    pub recently_settled_window_secs: u64,
    pub evidence_dir: PathBuf,
    pub debug_dir: PathBuf,
    pub sandbox: SandboxConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            settlement_grace_secs: 0,
            max_prepare_attempts: 3,
            max_execution_attempts: 2,
            max_failures: 3,
            failure_backoff_secs: 180,
            recently_settled_window_secs: 300,
            evidence_dir: PathBuf::from("state/evidence"),
            debug_dir: PathBuf::from("state/debug"),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl ResolverConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ResolverError::InvalidConfig(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// File (if given) or defaults, then the process environment, validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = base.with_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values found through `lookup`; unset or blank keys are ignored.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ORACLE_POLL_INTERVAL") {
            self.poll_interval_secs = parse_var("ORACLE_POLL_INTERVAL", &v)?;
        }
        if let Some(v) = get("ORACLE_SETTLEMENT_GRACE_SECONDS") {
            self.settlement_grace_secs = parse_var("ORACLE_SETTLEMENT_GRACE_SECONDS", &v)?;
        }
        if let Some(v) = get("ORACLE_AI_PREPARE_ATTEMPTS") {
            self.max_prepare_attempts = parse_var("ORACLE_AI_PREPARE_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("ORACLE_AI_SETTLEMENT_ATTEMPTS") {
            self.max_execution_attempts = parse_var("ORACLE_AI_SETTLEMENT_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("ORACLE_AI_MAX_FAILURES") {
            self.max_failures = parse_var("ORACLE_AI_MAX_FAILURES", &v)?;
        }
        if let Some(v) = get("ORACLE_AI_FAILURE_BACKOFF") {
            self.failure_backoff_secs = parse_var("ORACLE_AI_FAILURE_BACKOFF", &v)?;
        }
        if let Some(v) = get("ORACLE_RECENTLY_SETTLED_WINDOW") {
            self.recently_settled_window_secs = parse_var("ORACLE_RECENTLY_SETTLED_WINDOW", &v)?;
        }
        if let Some(v) = get("ORACLE_EVIDENCE_DIR") {
            self.evidence_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ORACLE_DEBUG_DIR") {
            self.debug_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ORACLE_SANDBOX_INTERPRETER") {
            self.sandbox.interpreter = v;
        }
        if let Some(v) = get("ORACLE_SANDBOX_TIMEOUT") {
            self.sandbox.timeout_secs = parse_var("ORACLE_SANDBOX_TIMEOUT", &v)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.poll_interval_secs == 0, "poll_interval_secs must be > 0"),
            (self.max_prepare_attempts == 0, "max_prepare_attempts must be > 0"),
            (self.max_execution_attempts == 0, "max_execution_attempts must be > 0"),
            (self.max_failures == 0, "max_failures must be > 0"),
        ];
        if let Some((_, msg)) = checks.iter().find(|(failed, _)| *failed) {
            return Err(ResolverError::InvalidConfig(msg.to_string()));
        }
        self.sandbox
            .validate()
            .map_err(|e| ResolverError::InvalidConfig(e.to_string()))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_prepare_attempts: self.max_prepare_attempts,
            max_execution_attempts: self.max_execution_attempts,
            debug_dir: Some(self.debug_dir.clone()),
        }
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ResolverError::InvalidConfig(format!("{key}: cannot parse {value:?}")))
}
