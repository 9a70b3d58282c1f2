//! Structured lifecycle events for the resolver.
//!
//! Every event carries a stable `event = "..."` field so log pipelines can
//! filter on it. All events of one poll cycle carry the [`CycleSpan`] of that cycle.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::Confidence;
use crate::domain::RequestId;

/// Longest summary logged for issues, warnings and errors.
pub const SUMMARY_LIMIT: usize = 240;

/// An `oracle.cycle` span tagged with a fresh cycle id.
///
/// Attach it with `Instrument` rather than entering it: a cycle awaits, and
/// an entered guard must not be held across `.await`.
pub struct CycleSpan {
    cycle_id: Uuid,
    span: tracing::Span,
}

impl CycleSpan {
    pub fn new() -> Self {
        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!("oracle.cycle", cycle_id = %cycle_id);
        Self { cycle_id, span }
    }

    pub fn cycle_id(&self) -> Uuid {
        self.cycle_id
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

impl Default for CycleSpan {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the scheduler left a request alone this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Settled,
    RecentlySettled,
    BackedOff { remaining_secs: u64 },
    AwaitingDeadline { remaining_secs: u64 },
    GeneratorUnavailable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Settled => "settled",
            SkipReason::RecentlySettled => "recently_settled",
            SkipReason::BackedOff { .. } => "backed_off",
            SkipReason::AwaitingDeadline { .. } => "awaiting_deadline",
            SkipReason::GeneratorUnavailable => "generator_unavailable",
        }
    }

    fn remaining_secs(&self) -> Option<u64> {
        match self {
            SkipReason::BackedOff { remaining_secs }
            | SkipReason::AwaitingDeadline { remaining_secs } => Some(*remaining_secs),
            _ => None,
        }
    }
}

/// Truncate to [`SUMMARY_LIMIT`] characters.
pub fn truncate_summary(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(SUMMARY_LIMIT) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

pub fn emit_cycle_started(now: u64, pending: usize) {
    info!(event = "cycle.started", chain_time = now, pending = pending);
}

pub fn emit_cycle_finished(duration_ms: u64, settled: usize, failed: usize) {
    info!(
        event = "cycle.finished",
        duration_ms = duration_ms,
        settled = settled,
        failed = failed,
    );
}

pub fn emit_request_skipped(id: &RequestId, reason: SkipReason) {
    match reason.remaining_secs() {
        Some(remaining) => info!(
            event = "request.skipped",
            request_id = %id.short(),
            reason = reason.as_str(),
            remaining_secs = remaining,
        ),
        None => debug!(
            event = "request.skipped",
            request_id = %id.short(),
            reason = reason.as_str(),
        ),
    }
}

pub fn emit_phase_changed(id: &RequestId, from: &str, to: &str) {
    debug!(event = "phase.changed", request_id = %id.short(), from = from, to = to);
}

pub fn emit_script_prepared(id: &RequestId, attempt: u32, confidence: Confidence, warnings: &[String]) {
    info!(
        event = "script.prepared",
        request_id = %id.short(),
        attempt = attempt,
        confidence = %confidence,
        warnings = %truncate_summary(&warnings.join("; ")),
    );
}

pub fn emit_script_rejected(id: &RequestId, attempt: u32, confidence: Confidence, issues: &str) {
    warn!(
        event = "script.rejected",
        request_id = %id.short(),
        attempt = attempt,
        confidence = %confidence,
        issues = %truncate_summary(issues),
    );
}

pub fn emit_execution_failed(id: &RequestId, attempt: u32, error: &str) {
    warn!(
        event = "execution.failed",
        request_id = %id.short(),
        attempt = attempt,
        error = %truncate_summary(error),
    );
}

pub fn emit_request_failed(id: &RequestId, failures: u32, error: &dyn std::fmt::Display) {
    warn!(
        event = "request.failed",
        request_id = %id.short(),
        failures = failures,
        error = %truncate_summary(&error.to_string()),
    );
}

pub fn emit_settlement_submitted(id: &RequestId, price: i64, tx_hash: &str) {
    info!(
        event = "settlement.submitted",
        request_id = %id.short(),
        price = price,
        tx_hash = %tx_hash,
    );
}

pub fn emit_settlement_failed(id: &RequestId, error: &dyn std::fmt::Display) {
    warn!(event = "settlement.failed", request_id = %id.short(), error = %error);
}
