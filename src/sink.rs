// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The write-once outcome sink (§4.6).

use crate::{
    errors::DuplicateOutcomeError,
    outcome::{Outcome, OutcomeKind},
    test_id::TestId,
};
use debug_ignore::DebugIgnore;
use std::{collections::HashMap, sync::Mutex};
use tracing::trace;

/// A callback invoked once per recorded outcome, in the order outcomes are
/// recorded (which has no cross-supervisor ordering guarantee; see §5).
pub type OutcomeCallback = Box<dyn Fn(&Outcome) + Send + Sync>;

/// Records the authoritative `{TestId -> Outcome}` mapping for a run.
///
/// Once an outcome is recorded for a `TestId` it is never overwritten: this
/// is enforced by [`OutcomeSink::record`] returning an error on a duplicate
/// rather than silently replacing the existing entry.
pub struct OutcomeSink {
    outcomes: Mutex<HashMap<TestId, Outcome>>,
    callback: DebugIgnore<Option<OutcomeCallback>>,
}

impl std::fmt::Debug for OutcomeSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeSink")
            .field("recorded", &self.outcomes.lock().unwrap().len())
            .finish()
    }
}

impl OutcomeSink {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            callback: DebugIgnore(None),
        }
    }

    /// Creates a sink that additionally invokes `callback` on every outcome
    /// as it is recorded, for live reporting.
    pub fn with_callback(callback: OutcomeCallback) -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            callback: DebugIgnore(Some(callback)),
        }
    }

    /// Records `outcome`, invoking the live callback if one is configured.
    ///
    /// Returns [`DuplicateOutcomeError`] if an outcome for this test was
    /// already recorded; the existing entry is left untouched.
    pub fn record(&self, outcome: Outcome) -> Result<(), DuplicateOutcomeError> {
        let test_id = outcome.test_id.clone();
        {
            let mut guard = self.outcomes.lock().unwrap();
            if guard.contains_key(&test_id) {
                return Err(DuplicateOutcomeError(test_id));
            }
            trace!(test_id = %outcome.test_id, kind = ?outcome.kind(), "recording outcome");
            guard.insert(test_id, outcome.clone());
        }
        if let Some(callback) = self.callback.as_ref() {
            callback(&outcome);
        }
        Ok(())
    }

    /// Returns `true` if an outcome has already been recorded for `test_id`.
    pub fn contains(&self, test_id: &TestId) -> bool {
        self.outcomes.lock().unwrap().contains_key(test_id)
    }

    /// The number of outcomes recorded so far.
    pub fn len(&self) -> usize {
        self.outcomes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots every outcome recorded so far, sorted by test id for
    /// deterministic reporting.
    pub fn snapshot(&self) -> Vec<Outcome> {
        let guard = self.outcomes.lock().unwrap();
        let mut outcomes: Vec<_> = guard.values().cloned().collect();
        outcomes.sort_by(|a, b| a.test_id.cmp(&b.test_id));
        outcomes
    }

    /// The exit code policy from §6: non-zero if any test ended as `Failed`,
    /// `Hanging`, or `Crashed`.
    pub fn exit_code(&self) -> i32 {
        let guard = self.outcomes.lock().unwrap();
        if guard.values().any(|o| o.kind().is_exit_failure()) {
            1
        } else {
            0
        }
    }

    /// Counts outcomes of each kind, for summary reporting.
    pub fn counts(&self) -> RunStats {
        let guard = self.outcomes.lock().unwrap();
        let mut stats = RunStats::default();
        for outcome in guard.values() {
            match outcome.kind() {
                OutcomeKind::Passed => stats.passed += 1,
                OutcomeKind::Failed => stats.failed += 1,
                OutcomeKind::Skipped => stats.skipped += 1,
                OutcomeKind::Hanging => stats.hanging += 1,
                OutcomeKind::Crashed => stats.crashed += 1,
            }
        }
        stats
    }
}

impl Default for OutcomeSink {
    fn default() -> Self {
        Self::new()
    }
}

/// A summary count of outcomes by kind.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunStats {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub hanging: usize,
    pub crashed: usize,
}

impl RunStats {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.hanging + self.crashed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::OutcomeStatus;

    fn passed(id: &str) -> Outcome {
        Outcome {
            test_id: TestId::new(id),
            display_name: id.to_owned(),
            status: OutcomeStatus::Passed,
            duration: None,
            output: None,
            recorded_at: chrono::Local::now(),
        }
    }

    #[test]
    fn records_each_test_exactly_once() {
        let sink = OutcomeSink::new();
        sink.record(passed("a")).unwrap();
        assert_eq!(sink.len(), 1);
        let err = sink.record(passed("a")).unwrap_err();
        assert_eq!(err.0, TestId::new("a"));
        assert_eq!(sink.len(), 1, "duplicate must not overwrite");
    }

    #[test]
    fn exit_code_is_zero_for_an_all_pass_run() {
        let sink = OutcomeSink::new();
        sink.record(passed("a")).unwrap();
        sink.record(passed("b")).unwrap();
        assert_eq!(sink.exit_code(), 0);
    }

    #[test]
    fn exit_code_is_nonzero_if_any_test_crashed() {
        let sink = OutcomeSink::new();
        sink.record(passed("a")).unwrap();
        sink.record(Outcome {
            test_id: TestId::new("b"),
            display_name: "b".to_owned(),
            status: OutcomeStatus::Crashed {
                reason: "did not report completion".to_owned(),
            },
            duration: None,
            output: None,
            recorded_at: chrono::Local::now(),
        })
        .unwrap();
        assert_eq!(sink.exit_code(), 1);
    }

    #[test]
    fn callback_fires_once_per_recorded_outcome() {
        let calls = std::sync::Arc::new(Mutex::new(Vec::new()));
        let calls_clone = calls.clone();
        let sink = OutcomeSink::with_callback(Box::new(move |outcome| {
            calls_clone.lock().unwrap().push(outcome.test_id.clone());
        }));
        sink.record(passed("a")).unwrap();
        sink.record(passed("b")).unwrap();
        assert_eq!(
            *calls.lock().unwrap(),
            vec![TestId::new("a"), TestId::new("b")]
        );
    }
}
