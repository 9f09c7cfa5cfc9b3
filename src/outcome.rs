// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The sink-facing outcome record: the one piece of data every other part of
//! an adjacent system (history, TUI, RPC) consumes.

use crate::test_id::TestId;
use chrono::{DateTime, Local};
use std::time::Duration;

/// The five outcome kinds a test can terminate in. Exactly one is recorded
/// per [`TestId`] per run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum OutcomeKind {
    Passed,
    Failed,
    Skipped,
    Hanging,
    Crashed,
}

impl OutcomeKind {
    /// Whether a suite containing this outcome should cause a non-zero exit
    /// code, per the §6 exit code policy.
    pub fn is_exit_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Hanging | Self::Crashed)
    }
}

/// Output captured from a test or batch, capped to a configured size.
///
/// Per the output-buffering design note, buffers are capped rather than left
/// unbounded, and truncation is tagged on the final record instead of
/// silently dropping the tail.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CapturedOutput {
    pub text: String,
    pub truncated: bool,
}

impl CapturedOutput {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// The kind-specific detail attached to an outcome.
#[derive(Clone, Debug)]
pub enum OutcomeStatus {
    Passed,
    Failed {
        error_message: String,
        stack_trace: Option<String>,
    },
    Skipped {
        reason: Option<String>,
    },
    /// A test that exceeded its absolute deadline in a size-1 batch.
    Hanging { reason: String },
    /// A test that started but never emitted a terminal event before its
    /// worker ended.
    Crashed { reason: String },
}

impl OutcomeStatus {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Passed => OutcomeKind::Passed,
            Self::Failed { .. } => OutcomeKind::Failed,
            Self::Skipped { .. } => OutcomeKind::Skipped,
            Self::Hanging { .. } => OutcomeKind::Hanging,
            Self::Crashed { .. } => OutcomeKind::Crashed,
        }
    }
}

/// The authoritative, write-once record for a single test's outcome.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub test_id: TestId,
    pub display_name: String,
    pub status: OutcomeStatus,
    /// Wall-clock duration of the attempt that produced this outcome, if
    /// known. Hanging/crashed outcomes discovered via the absolute deadline
    /// or a worker's abnormal exit always have a duration; ones discovered
    /// because a sibling batch never started them may not.
    pub duration: Option<Duration>,
    pub output: Option<CapturedOutput>,
    /// Wall-clock moment the sink accepted this outcome, for reporting tools
    /// downstream of the core that want to correlate a run's outcomes
    /// against other timestamped activity.
    pub recorded_at: DateTime<Local>,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        self.status.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_failure_matches_spec_exit_code_policy() {
        assert!(!OutcomeKind::Passed.is_exit_failure());
        assert!(!OutcomeKind::Skipped.is_exit_failure());
        assert!(OutcomeKind::Failed.is_exit_failure());
        assert!(OutcomeKind::Hanging.is_exit_failure());
        assert!(OutcomeKind::Crashed.is_exit_failure());
    }
}
