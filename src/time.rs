// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A minimal elapsed-time tracker for supervisors.
//!
//! Unlike the pause/resume stopwatch this was grounded on, batches in this
//! scheduler have no job-control analog (no SIGTSTP/SIGCONT handling), so
//! this only ever counts forward from the moment a batch starts.

use std::time::{Duration, Instant};

/// Tracks how long a batch attempt has been running.
#[derive(Clone, Copy, Debug)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn start_now() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// `true` once `elapsed()` would exceed `deadline`.
    pub fn has_elapsed(&self, deadline: Duration) -> bool {
        self.elapsed() >= deadline
    }
}
