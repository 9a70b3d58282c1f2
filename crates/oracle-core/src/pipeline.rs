//! Resolution pipeline: prepare a script, execute it, package evidence.
//!
//! ```text
//! UNPREPARED -> PREPARING -> PREPARED -> EXECUTING -> RESOLVED
//!                   |                        |
//!                   +-------> FAILED <-------+
//! ```
//!
//! Prepare loops generate→restore→analyze until a script passes analysis or
//! the attempt bound is hit. Execute loops run→(on failure) re-prepare with
//! the failing script and its error as feedback. A prepared script is never
//! executed twice: the caller hands it over by value and it is dropped on
//! failure.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::analysis::{analyze_script, Confidence, ScriptAnalysis};
use crate::domain::{sha256_hex, Evidence, ExecutionTrace, PendingRequest, ResolverError, Result};
use crate::generator::{CodeGenerator, GenerationContext, PreviousAttempt};
use crate::obs;
use crate::prompt::build_resolution_task;
use crate::sandbox::{persist_debug_artifacts, ExecutionResult, ScriptExecutor};
use crate::sanitize::sanitize_ancillary;

/// Lines of generated source echoed at `debug` level per attempt.
const SCRIPT_PREVIEW_LINES: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Generate/analyze rounds per prepare step.
    pub max_prepare_attempts: u32,
    /// Execute rounds per resolution, each possibly re-preparing.
    pub max_execution_attempts: u32,
    /// Where failed runs are captured; `None` disables capture.
    pub debug_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_prepare_attempts: 3,
            max_execution_attempts: 2,
            debug_dir: Some(PathBuf::from("state/debug")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Unprepared,
    Preparing,
    Prepared,
    Executing,
    Resolved,
    Failed,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Unprepared => "UNPREPARED",
            PipelinePhase::Preparing => "PREPARING",
            PipelinePhase::Prepared => "PREPARED",
            PipelinePhase::Executing => "EXECUTING",
            PipelinePhase::Resolved => "RESOLVED",
            PipelinePhase::Failed => "FAILED",
        }
    }
}

/// A script that passed static analysis and is waiting to run.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedScript {
    /// Source with placeholders restored; what actually runs.
    pub script: String,
    /// Source as the generator wrote it, tokens intact. Used as retry feedback.
    masked_script: String,
    pub analysis: ScriptAnalysis,
    pub confidence: Confidence,
    pub prepared_at: DateTime<Utc>,
    /// SHA-256 hex of `script`.
    pub script_digest: String,
}

impl PreparedScript {
    fn new(script: String, masked_script: String, analysis: ScriptAnalysis) -> Self {
        Self {
            script_digest: sha256_hex(script.as_bytes()),
            confidence: analysis.confidence(),
            script,
            masked_script,
            analysis,
            prepared_at: Utc::now(),
        }
    }

    fn feedback(&self, error: String) -> PreviousAttempt {
        PreviousAttempt {
            previous_code: self.masked_script.clone(),
            error,
        }
    }
}

/// Tracks and logs the phase of one request.
struct PhaseTracker<'a> {
    request: &'a PendingRequest,
    phase: PipelinePhase,
}

impl<'a> PhaseTracker<'a> {
    fn new(request: &'a PendingRequest, phase: PipelinePhase) -> Self {
        Self { request, phase }
    }

    fn advance(&mut self, next: PipelinePhase) {
        if self.phase != next {
            obs::emit_phase_changed(&self.request.request_id, self.phase.as_str(), next.as_str());
            self.phase = next;
        }
    }
}

pub struct ResolutionPipeline {
    generator: Arc<dyn CodeGenerator>,
    executor: Arc<dyn ScriptExecutor>,
    config: PipelineConfig,
}

impl ResolutionPipeline {
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        executor: Arc<dyn ScriptExecutor>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            generator,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Generate and analyze until a script passes or attempts run out.
    ///
    /// A generator failure ends the step immediately. `previous` seeds the
    /// first attempt with feedback from a failed execution.
    pub async fn prepare(
        &self,
        request: &PendingRequest,
        previous: Option<PreviousAttempt>,
    ) -> Result<PreparedScript> {
        let mut phases = PhaseTracker::new(request, PipelinePhase::Unprepared);
        let result = self.prepare_tracked(request, previous, &mut phases).await;
        if result.is_err() {
            phases.advance(PipelinePhase::Failed);
        }
        result
    }

    async fn prepare_tracked(
        &self,
        request: &PendingRequest,
        previous: Option<PreviousAttempt>,
        phases: &mut PhaseTracker<'_>,
    ) -> Result<PreparedScript> {
        let id = &request.request_id;
        let sanitized = sanitize_ancillary(&request.ancillary_text());
        let task = build_resolution_task(&sanitized);
        let base_context = GenerationContext::new(request, &sanitized);

        let mut feedback = previous;
        let mut last_issue = String::new();

        for attempt in 1..=self.config.max_prepare_attempts {
            phases.advance(PipelinePhase::Preparing);
            let context = base_context.clone().with_previous_attempt(feedback.take());
            let generated = self.generator.generate(&task, &context).await?;
            let script = sanitized.restore(&generated);
            log_script_preview(request, attempt, &script);

            let analysis = analyze_script(&script);
            let confidence = analysis.confidence();
            if analysis.success {
                obs::emit_script_prepared(id, attempt, confidence, &analysis.warnings);
                phases.advance(PipelinePhase::Prepared);
                return Ok(PreparedScript::new(script, generated, analysis));
            }

            last_issue = analysis.issue_summary();
            obs::emit_script_rejected(id, attempt, confidence, &last_issue);
            feedback = Some(PreviousAttempt {
                previous_code: generated,
                error: last_issue.clone(),
            });
        }

        Err(ResolverError::Analysis {
            attempts: self.config.max_prepare_attempts,
            issue: last_issue,
        })
    }

    /// Execute `cached` (or a freshly prepared script) and package evidence.
    ///
    /// The returned evidence has no `settled_at`; the caller stamps it before
    /// hashing.
    pub async fn resolve(
        &self,
        request: &PendingRequest,
        cached: Option<PreparedScript>,
    ) -> Result<Evidence> {
        let id = &request.request_id;
        let mut phases = PhaseTracker::new(
            request,
            if cached.is_some() {
                PipelinePhase::Prepared
            } else {
                PipelinePhase::Unprepared
            },
        );

        let mut prepared = cached;
        let mut feedback: Option<PreviousAttempt> = None;
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_execution_attempts {
            let script = match prepared.take() {
                Some(script) => script,
                None => match self.prepare_tracked(request, feedback.take(), &mut phases).await {
                    Ok(script) => script,
                    Err(e) => {
                        phases.advance(PipelinePhase::Failed);
                        return Err(e);
                    }
                },
            };

            phases.advance(PipelinePhase::Executing);
            let result = match self.executor.execute(&script.script).await {
                Ok(result) => result,
                Err(e) => {
                    last_error = e.to_string();
                    obs::emit_execution_failed(id, attempt, &last_error);
                    if let Some(dir) = &self.config.debug_dir {
                        let failed =
                            ExecutionResult::from_output(None, String::new(), last_error.clone(), 0);
                        persist_debug_artifacts(
                            dir,
                            id,
                            &format!("exec{attempt}"),
                            &script.script,
                            &failed,
                        );
                    }
                    feedback = Some(script.feedback(last_error.clone()));
                    continue;
                }
            };

            if let Some(verdict) = result.verdict() {
                phases.advance(PipelinePhase::Resolved);
                return Ok(Evidence {
                    request_id: request.request_id,
                    identifier: request.identifier,
                    timestamp: request.timestamp,
                    ancillary: request.ancillary_text(),
                    decision: verdict.decision.into(),
                    reason: verdict.reason.clone(),
                    price: verdict.decision.price(),
                    data: verdict.data.clone(),
                    execution: Some(ExecutionTrace {
                        script_digest: script.script_digest.clone(),
                        stdout: result.stdout.clone(),
                        stderr: result.stderr.clone(),
                        executed_at: Utc::now(),
                        analysis: script.analysis.clone(),
                        analysis_confidence: script.confidence,
                        prepared_at: script.prepared_at,
                        script: script.script,
                    }),
                    settled_at: None,
                });
            }

            last_error = result.error_message();
            obs::emit_execution_failed(id, attempt, &last_error);
            if let Some(dir) = &self.config.debug_dir {
                persist_debug_artifacts(dir, id, &format!("exec{attempt}"), &script.script, &result);
            }
            feedback = Some(script.feedback(last_error.clone()));
        }

        phases.advance(PipelinePhase::Failed);
        Err(ResolverError::Execution {
            attempts: self.config.max_execution_attempts,
            reason: last_error,
        })
    }
}

fn log_script_preview(request: &PendingRequest, attempt: u32, script: &str) {
    let preview: Vec<&str> = script.lines().take(SCRIPT_PREVIEW_LINES).collect();
    tracing::debug!(
        request_id = %request.request_id.short(),
        attempt = attempt,
        lines = script.lines().count(),
        "generated script:\n{}",
        preview.join("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bytes32, Decision, EvidenceDecision};
    use crate::fakes::{CannedExecutor, ScriptedGenerator};
    use crate::generator::GenerationError;
    use crate::sandbox::SandboxError;

    const GOOD: &str = "import json\nimport requests\n\ndef resolve_oracle():\n    return {'decision': 'YES', 'reason': 'ok'}\n\nif __name__ == '__main__':\n    print(json.dumps(resolve_oracle()))\n";
    const NO_ENTRY: &str = "import json\nimport requests\n\ndef main():\n    return 1\n\nif __name__ == '__main__':\n    main()\n";

    fn request(ancillary: &str) -> PendingRequest {
        PendingRequest {
            request_id: Bytes32::new([5; 32]),
            requester: "0x01".into(),
            reward_token: "0x02".into(),
            reward: "0".into(),
            timestamp: 100,
            identifier: Bytes32::new([6; 32]),
            ancillary_data: ancillary.as_bytes().to_vec(),
            settled: false,
            settled_price: 0,
            evidence_hash: Bytes32::ZERO,
        }
    }

    fn ok_run(stdout: &str) -> ExecutionResult {
        ExecutionResult::from_output(Some(0), stdout.into(), String::new(), 1)
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            debug_dir: None,
            ..PipelineConfig::default()
        }
    }

    fn pipeline(generator: Arc<ScriptedGenerator>, executor: Arc<CannedExecutor>) -> ResolutionPipeline {
        ResolutionPipeline::new(generator, executor, config())
    }

    #[tokio::test]
    async fn test_prepare_retries_with_analysis_feedback() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok(NO_ENTRY.to_string()),
            Ok(GOOD.to_string()),
        ]));
        let p = pipeline(generator.clone(), Arc::new(CannedExecutor::new(vec![])));

        let prepared = p.prepare(&request("Is it sunny?"), None).await.unwrap();
        assert_eq!(prepared.confidence, Confidence::High);
        assert_eq!(prepared.script_digest, sha256_hex(GOOD.as_bytes()));

        let contexts = generator.contexts();
        assert_eq!(contexts.len(), 2);
        assert!(contexts[0].previous_attempt.is_none());
        let retry = contexts[1].previous_attempt.as_ref().unwrap();
        assert_eq!(retry.previous_code, NO_ENTRY);
        assert!(retry.error.contains("resolve_oracle() function not defined"));
    }

    #[tokio::test]
    async fn test_prepare_exhaustion_reports_last_issue() {
        let generator = Arc::new(ScriptedGenerator::new(
            (0..3).map(|_| Ok(NO_ENTRY.to_string())).collect(),
        ));
        let p = pipeline(generator.clone(), Arc::new(CannedExecutor::new(vec![])));

        let err = p.prepare(&request("q"), None).await.unwrap_err();
        match err {
            ResolverError::Analysis { attempts, issue } => {
                assert_eq!(attempts, 3);
                assert!(issue.contains("resolve_oracle()"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn test_generation_failure_stops_immediately() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Err(GenerationError::Transport("connection refused".into())),
            Ok(GOOD.to_string()),
        ]));
        let p = pipeline(generator.clone(), Arc::new(CannedExecutor::new(vec![])));

        let err = p.prepare(&request("q"), None).await.unwrap_err();
        assert!(matches!(err, ResolverError::Generation(_)));
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_placeholders_restored_but_never_sent() {
        let long_hex = format!("0x{}", "ab".repeat(32));
        let generated = format!(
            "PLACEHOLDER_HEX_1 = \"__PLACEHOLDER_HEX_1__\"\n{GOOD}"
        );
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(generated)]));
        let p = pipeline(generator.clone(), Arc::new(CannedExecutor::new(vec![])));

        let prepared = p
            .prepare(&request(&format!("Did {long_hex} pay?")), None)
            .await
            .unwrap();
        assert!(prepared.script.contains(&long_hex));
        assert!(!generator.tasks()[0].contains(&long_hex));
        assert!(!serde_json::to_string(&generator.contexts()[0])
            .unwrap()
            .contains(&long_hex));
    }

    #[tokio::test]
    async fn test_resolve_uses_cached_script_without_generating() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(GOOD.to_string())]));
        let executor = Arc::new(CannedExecutor::new(vec![Ok(ok_run(
            "{\"decision\": \"no\", \"reason\": \"below\", \"data\": {\"price\": 1}}",
        ))]));
        let p = pipeline(generator.clone(), executor.clone());

        let req = request("q");
        let prepared = p.prepare(&req, None).await.unwrap();
        let evidence = p.resolve(&req, Some(prepared)).await.unwrap();

        assert_eq!(generator.calls(), 1);
        assert_eq!(evidence.decision, EvidenceDecision::No);
        assert_eq!(evidence.price, Decision::No.price());
        assert_eq!(evidence.reason, "below");
        let trace = evidence.execution.unwrap();
        assert_eq!(trace.script, GOOD);
        assert_eq!(trace.analysis_confidence, Confidence::High);
        assert!(evidence.settled_at.is_none());
        assert_eq!(executor.scripts(), vec![GOOD.to_string()]);
    }

    #[tokio::test]
    async fn test_execution_failure_discards_script_and_feeds_back_error() {
        let second = GOOD.replace("'ok'", "'fixed'");
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok(GOOD.to_string()),
            Ok(second.clone()),
        ]));
        let executor = Arc::new(CannedExecutor::new(vec![
            Ok(ExecutionResult::from_output(
                Some(1),
                String::new(),
                "KeyError: 'price'".into(),
                1,
            )),
            Ok(ok_run("{\"decision\": \"YES\", \"reason\": \"fixed\"}")),
        ]));
        let p = pipeline(generator.clone(), executor.clone());

        let evidence = p.resolve(&request("q"), None).await.unwrap();
        assert_eq!(evidence.decision, EvidenceDecision::Yes);
        assert_eq!(executor.scripts(), vec![GOOD.to_string(), second]);

        let retry = generator.contexts()[1].previous_attempt.clone().unwrap();
        assert_eq!(retry.previous_code, GOOD);
        assert!(retry.error.contains("KeyError"));
    }

    #[tokio::test]
    async fn test_execution_exhaustion_writes_debug_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(
            (0..2).map(|_| Ok(GOOD.to_string())).collect(),
        ));
        let executor = Arc::new(CannedExecutor::new(vec![
            Ok(ExecutionResult::timed_out(120)),
            Ok(ok_run("{\"decision\": \"MAYBE\"}")),
        ]));
        let p = ResolutionPipeline::new(
            generator,
            executor,
            PipelineConfig {
                debug_dir: Some(dir.path().to_path_buf()),
                ..PipelineConfig::default()
            },
        );

        let err = p.resolve(&request("q"), None).await.unwrap_err();
        match err {
            ResolverError::Execution { attempts, reason } => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("MAYBE"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        // Two failed runs, three files each.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 6);
    }

    #[tokio::test]
    async fn test_sandbox_error_still_writes_debug_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(GOOD.to_string())]));
        let executor = Arc::new(CannedExecutor::new(vec![Err(SandboxError::Spawn {
            interpreter: "python3".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        })]));
        let p = ResolutionPipeline::new(
            generator,
            executor,
            PipelineConfig {
                max_execution_attempts: 1,
                debug_dir: Some(dir.path().to_path_buf()),
                ..PipelineConfig::default()
            },
        );

        let err = p.resolve(&request("q"), None).await.unwrap_err();
        assert!(matches!(err, ResolverError::Execution { attempts: 1, .. }));

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 3);
        let script = names.iter().find(|n| n.ends_with(".py")).unwrap();
        assert!(script.contains("-exec1-"));
        assert_eq!(std::fs::read_to_string(dir.path().join(script)).unwrap(), GOOD);
        let stderr = names.iter().find(|n| n.ends_with(".stderr")).unwrap();
        let logged = std::fs::read_to_string(dir.path().join(stderr)).unwrap();
        assert!(logged.contains("failed to spawn interpreter python3"), "{logged}");
    }
}
