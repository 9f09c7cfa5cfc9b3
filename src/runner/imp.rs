// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-level orchestration: wires up the work queue, batch-size controller,
//! outcome sink, signal handler, N worker supervisors, and the tier
//! promotion monitor into one run.

use crate::batch_size::BatchSizeController;
use crate::config::RunnerConfig;
use crate::errors::RunnerBuildError;
use crate::queue::{SupervisorId, WorkQueue};
use crate::runner::monitor::TierPromotionMonitor;
use crate::runner::supervisor::{Supervisor, WorkerSpawnSpec};
use crate::sink::{OutcomeCallback, OutcomeSink, RunStats};
use crate::test_id::TestId;
use futures::future::join_all;
use std::sync::Arc;
use tracing::info;

/// Builds a [`Runner`] for one test run.
pub struct RunnerBuilder {
    tests: Vec<TestId>,
    config: RunnerConfig,
    worker_program: String,
    worker_args: Vec<String>,
    worker_envs: Vec<(String, String)>,
    assembly_path: String,
    on_outcome: Option<OutcomeCallback>,
}

impl RunnerBuilder {
    /// Starts a builder for running `tests` by spawning `worker_program`
    /// (with `worker_args`) against `assembly_path` once per batch.
    pub fn new(
        tests: impl IntoIterator<Item = TestId>,
        worker_program: impl Into<String>,
        assembly_path: impl Into<String>,
    ) -> Self {
        Self {
            tests: tests.into_iter().collect(),
            config: RunnerConfig::default(),
            worker_program: worker_program.into(),
            worker_args: Vec::new(),
            worker_envs: Vec::new(),
            assembly_path: assembly_path.into(),
            on_outcome: None,
        }
    }

    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn worker_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.worker_args = args.into_iter().collect();
        self
    }

    /// Extra environment variables set on every spawned worker process, on
    /// top of the supervisor's own environment.
    pub fn worker_envs(mut self, envs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.worker_envs = envs.into_iter().collect();
        self
    }

    /// Registers a callback invoked once per outcome, in recording order,
    /// for live reporting as the run progresses.
    pub fn on_outcome(mut self, callback: OutcomeCallback) -> Self {
        self.on_outcome = Some(callback);
        self
    }

    pub fn build(self) -> Result<Runner, RunnerBuildError> {
        if self.tests.is_empty() {
            return Err(RunnerBuildError::EmptyTestList);
        }
        Ok(Runner {
            tests: self.tests,
            config: self.config,
            worker_program: self.worker_program,
            worker_args: self.worker_args,
            worker_envs: self.worker_envs,
            assembly_path: self.assembly_path,
            on_outcome: self.on_outcome,
        })
    }
}

/// A fully configured run, ready to [`Runner::execute`].
pub struct Runner {
    tests: Vec<TestId>,
    config: RunnerConfig,
    worker_program: String,
    worker_args: Vec<String>,
    worker_envs: Vec<(String, String)>,
    assembly_path: String,
    on_outcome: Option<OutcomeCallback>,
}

impl Runner {
    /// Runs every supervised test to a recorded outcome, returning the final
    /// counts and the process exit code policy from §6.
    pub async fn execute(self) -> Result<RunOutput, RunnerBuildError> {
        let total = self.tests.len();
        let queue = Arc::new(WorkQueue::new(self.tests));
        let sink = Arc::new(match self.on_outcome {
            Some(callback) => OutcomeSink::with_callback(callback),
            None => OutcomeSink::new(),
        });
        let batch_size = Arc::new(BatchSizeController::new(
            total,
            self.config.supervisor_count.get(),
        ));
        let cancellation = crate::signal::install()?;

        info!(
            total_tests = total,
            supervisors = self.config.supervisor_count.get(),
            initial_batch_size = batch_size.current(),
            "starting run"
        );

        let spawn_spec = WorkerSpawnSpec {
            program: self.worker_program,
            args: self.worker_args,
            envs: self.worker_envs,
            assembly_path: self.assembly_path,
        };

        let monitor = TierPromotionMonitor::new(
            queue.clone(),
            batch_size.clone(),
            self.config.clone(),
            cancellation.clone(),
        );
        let mut handles = vec![tokio::spawn(monitor.run())];

        for i in 0..self.config.supervisor_count.get() {
            let supervisor = Supervisor::new(
                SupervisorId(i),
                queue.clone(),
                sink.clone(),
                batch_size.clone(),
                self.config.clone(),
                spawn_spec.clone(),
                cancellation.clone(),
            );
            handles.push(tokio::spawn(supervisor.run()));
        }

        // The monitor and every supervisor run concurrently to completion;
        // none of their join handles carries a result we act on, but waiting
        // on all of them together (rather than one at a time) is what lets a
        // slow supervisor's shutdown overlap with the others'.
        let _ = join_all(handles).await;

        let stats = sink.counts();
        info!(?stats, "run complete");

        Ok(RunOutput {
            exit_code: sink.exit_code(),
            stats,
            outcomes: sink.snapshot(),
        })
    }
}

/// The result of a completed run.
pub struct RunOutput {
    pub exit_code: i32,
    pub stats: RunStats,
    pub outcomes: Vec<crate::outcome::Outcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_rejects_an_empty_test_list() {
        let err = RunnerBuilder::new(Vec::<TestId>::new(), "worker", "assembly.dll").build();
        assert!(matches!(err, Err(RunnerBuildError::EmptyTestList)));
    }

    #[test]
    fn build_succeeds_with_at_least_one_test() {
        let runner = RunnerBuilder::new(vec![TestId::new("a")], "worker", "assembly.dll").build();
        assert!(runner.is_ok());
    }
}
