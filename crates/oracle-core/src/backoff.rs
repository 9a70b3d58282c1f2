//! Per-request failure accounting with a fixed backoff window.

use std::collections::HashMap;

use crate::domain::RequestId;

/// Where in the pipeline a request last failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailureStage {
    /// Generation or static analysis.
    #[default]
    Prepare,
    /// Sandbox execution, after a successful prepare.
    Execution,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureState {
    /// Consecutive resolution failures, capped at the tracker's maximum.
    pub count: u32,
    /// Chain time of the most recent failure.
    pub last_failure: u64,
    pub stage: FailureStage,
}

/// Suppresses requests whose resolution keeps failing.
///
/// After `max_failures` consecutive failures a request is skipped until
/// `backoff_secs` have elapsed since the last one. A successful prepare
/// clears only prepare-stage failures; execution failures are cleared by a
/// settlement.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    max_failures: u32,
    backoff_secs: u64,
    states: HashMap<RequestId, FailureState>,
}

impl FailureTracker {
    pub fn new(max_failures: u32, backoff_secs: u64) -> Self {
        Self {
            max_failures,
            backoff_secs,
            states: HashMap::new(),
        }
    }

    pub fn record_failure(&mut self, id: RequestId, now: u64, stage: FailureStage) -> FailureState {
        let max = self.max_failures;
        let state = self.states.entry(id).or_default();
        state.count = (state.count + 1).min(max);
        state.last_failure = now;
        state.stage = stage;
        *state
    }

    pub fn clear(&mut self, id: &RequestId) {
        self.states.remove(id);
    }

    /// Drop the state only if the last failure happened at `stage`.
    pub fn clear_stage(&mut self, id: &RequestId, stage: FailureStage) {
        if self.states.get(id).is_some_and(|s| s.stage == stage) {
            self.states.remove(id);
        }
    }

    /// Keep only requests for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&RequestId) -> bool) {
        self.states.retain(|id, _| keep(id));
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, id: &RequestId) -> Option<FailureState> {
        self.states.get(id).copied()
    }

    /// Remaining backoff in seconds, or `None` if the request may be attempted.
    pub fn remaining(&self, id: &RequestId, now: u64) -> Option<u64> {
        let state = self.states.get(id)?;
        if state.count < self.max_failures {
            return None;
        }
        let elapsed = now.saturating_sub(state.last_failure);
        (elapsed < self.backoff_secs).then(|| self.backoff_secs - elapsed)
    }

    pub fn is_backed_off(&self, id: &RequestId, now: u64) -> bool {
        self.remaining(id, now).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bytes32;

    const ID: Bytes32 = Bytes32::ZERO;

    #[test]
    fn test_backoff_engages_at_max_and_expires() {
        let mut tracker = FailureTracker::new(3, 180);
        tracker.record_failure(ID, 100, FailureStage::Prepare);
        tracker.record_failure(ID, 110, FailureStage::Prepare);
        assert!(!tracker.is_backed_off(&ID, 111));
        tracker.record_failure(ID, 120, FailureStage::Prepare);

        assert!(tracker.is_backed_off(&ID, 120));
        assert_eq!(tracker.remaining(&ID, 299), Some(1));
        assert!(tracker.is_backed_off(&ID, 299));
        assert!(!tracker.is_backed_off(&ID, 300));
    }

    #[test]
    fn test_count_is_capped() {
        let mut tracker = FailureTracker::new(2, 10);
        for t in 0..5 {
            tracker.record_failure(ID, t, FailureStage::Execution);
        }
        assert_eq!(
            tracker.state(&ID),
            Some(FailureState {
                count: 2,
                last_failure: 4,
                stage: FailureStage::Execution,
            })
        );
    }

    #[test]
    fn test_clear_resets() {
        let mut tracker = FailureTracker::new(1, 1_000);
        tracker.record_failure(ID, 5, FailureStage::Prepare);
        assert!(tracker.is_backed_off(&ID, 6));
        tracker.clear(&ID);
        assert!(!tracker.is_backed_off(&ID, 6));
        assert_eq!(tracker.state(&ID), None);
    }

    #[test]
    fn test_prepare_success_keeps_execution_failures() {
        let mut tracker = FailureTracker::new(3, 60);
        tracker.record_failure(ID, 10, FailureStage::Execution);
        tracker.clear_stage(&ID, FailureStage::Prepare);
        assert_eq!(tracker.state(&ID).unwrap().count, 1);

        tracker.record_failure(ID, 20, FailureStage::Prepare);
        tracker.clear_stage(&ID, FailureStage::Prepare);
        assert_eq!(tracker.state(&ID), None);
    }

    #[test]
    fn test_retain_drops_unlisted_requests() {
        let other = Bytes32::new([9; 32]);
        let mut tracker = FailureTracker::new(3, 60);
        tracker.record_failure(ID, 1, FailureStage::Prepare);
        tracker.record_failure(other, 1, FailureStage::Execution);

        tracker.retain(|id| *id == other);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.state(&ID), None);
        assert!(tracker.state(&other).is_some());
    }
}
