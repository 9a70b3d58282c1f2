//! Best-effort capture of failed runs for later inspection.

use std::path::{Path, PathBuf};

use chrono::Utc;

use super::execution::ExecutionResult;
use crate::domain::RequestId;

/// Files written for one failed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugArtifacts {
    pub script: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

/// Write `{request}-{label}-{YYYYmmddHHMMSS}.{py,stdout,stderr}` under `dir`.
///
/// Never fails the caller: any I/O error is logged and `None` is returned.
pub fn persist_debug_artifacts(
    dir: &Path,
    request_id: &RequestId,
    label: &str,
    script: &str,
    result: &ExecutionResult,
) -> Option<DebugArtifacts> {
    match write_artifacts(dir, request_id, label, script, result) {
        Ok(artifacts) => {
            tracing::debug!(
                request_id = %request_id.short(),
                script = %artifacts.script.display(),
                "saved debug artifacts"
            );
            Some(artifacts)
        }
        Err(e) => {
            tracing::warn!(
                request_id = %request_id.short(),
                dir = %dir.display(),
                error = %e,
                "failed to persist debug artifacts"
            );
            None
        }
    }
}

fn write_artifacts(
    dir: &Path,
    request_id: &RequestId,
    label: &str,
    script: &str,
    result: &ExecutionResult,
) -> std::io::Result<DebugArtifacts> {
    std::fs::create_dir_all(dir)?;
    let stem = format!(
        "{}-{}-{}",
        request_id.to_hex(),
        label,
        Utc::now().format("%Y%m%d%H%M%S")
    );
    let artifacts = DebugArtifacts {
        script: dir.join(format!("{stem}.py")),
        stdout: dir.join(format!("{stem}.stdout")),
        stderr: dir.join(format!("{stem}.stderr")),
    };
    std::fs::write(&artifacts.script, script)?;
    std::fs::write(&artifacts.stdout, &result.stdout)?;
    std::fs::write(&artifacts.stderr, &result.stderr)?;
    Ok(artifacts)
}
