// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker supervisor (§4.3): owns one worker process for the lifetime of
//! one batch, streams its events, and enforces the timeouts that turn a
//! silent or stuck worker into an attributable outcome instead of a wedged
//! run.

use crate::batch_size::BatchSizeController;
use crate::channel::SubprocessChannel;
use crate::config::RunnerConfig;
use crate::outcome::{CapturedOutput, Outcome, OutcomeStatus};
use crate::protocol::{Command as WireCommand, Event};
use crate::queue::{SupervisorId, WorkQueue};
use crate::signal::CancellationToken;
use crate::sink::OutcomeSink;
use crate::test_id::TestId;
use crate::time::Stopwatch;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Everything a supervisor needs to spawn a worker for a batch.
#[derive(Clone)]
pub struct WorkerSpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub assembly_path: String,
}

/// Coarse state of a single batch attempt, kept for diagnostics.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BatchState {
    AwaitingStart,
    Streaming,
}

/// Why a batch's stream ended without every test reaching a terminal event.
///
/// Distinguishes the two triggers §4.3 gives different names but the same
/// residue handling: an idle stream is not conclusively a crash, so it never
/// attributes blame on its own at batch sizes above one; an abnormal worker
/// exit does, for whichever test was actually running when it happened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum StallKind {
    IdleStream,
    AbnormalExit,
}

/// Runs one worker supervisor's loop: repeatedly take a batch, run it to
/// completion (or failure), record outcomes, and repeat until the queue is
/// drained or cancellation is observed.
pub struct Supervisor {
    id: SupervisorId,
    queue: Arc<WorkQueue>,
    sink: Arc<OutcomeSink>,
    batch_size: Arc<BatchSizeController>,
    config: RunnerConfig,
    spawn_spec: WorkerSpawnSpec,
    cancellation: CancellationToken,
}

impl Supervisor {
    pub fn new(
        id: SupervisorId,
        queue: Arc<WorkQueue>,
        sink: Arc<OutcomeSink>,
        batch_size: Arc<BatchSizeController>,
        config: RunnerConfig,
        spawn_spec: WorkerSpawnSpec,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            id,
            queue,
            sink,
            batch_size,
            config,
            spawn_spec,
            cancellation,
        }
    }

    /// Runs until the queue reports complete or cancellation fires.
    pub async fn run(mut self) {
        let mut cancel_rx = self.cancellation.subscribe();
        loop {
            if self.queue.is_complete() {
                break;
            }

            let max_size = self.batch_size.current();
            let batch = self.queue.take_batch(self.id, max_size);
            if batch.is_empty() {
                if self.queue.is_complete() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.config.idle_poll_interval) => continue,
                    _ = cancel_rx.recv() => break,
                }
            }

            trace!(supervisor = self.id.0, count = batch.len(), "starting batch");
            if self.run_batch(batch, &mut cancel_rx).await {
                break; // cancelled
            }
        }
        debug!(supervisor = self.id.0, "supervisor loop exiting");
    }

    /// Runs a single batch to completion. Returns `true` if cancellation
    /// ended the batch early.
    async fn run_batch(
        &mut self,
        batch: Vec<TestId>,
        cancel_rx: &mut tokio::sync::broadcast::Receiver<()>,
    ) -> bool {
        let channel = SubprocessChannel::spawn(
            &self.spawn_spec.program,
            &self.spawn_spec.args,
            &self.spawn_spec.envs,
        );
        let batch_len = batch.len();
        let mut channel = match channel {
            Ok(channel) => channel,
            Err(err) => {
                warn!(supervisor = self.id.0, %err, "failed to spawn worker; demoting batch");
                self.demote_residue_or_attribute(batch_len, batch, StallKind::AbnormalExit);
                return false;
            }
        };

        let run_command = WireCommand::Run {
            assembly_path: self.spawn_spec.assembly_path.clone(),
            tests: Some(batch.clone()),
            timeout_seconds: None,
        };
        if let Err(err) = channel.send(&run_command).await {
            warn!(supervisor = self.id.0, %err, "failed to send Run command; demoting batch");
            channel.kill().await;
            self.demote_residue_or_attribute(batch_len, batch, StallKind::AbnormalExit);
            return false;
        }

        let cancelled = self.stream_batch(&mut channel, &batch, cancel_rx).await;
        channel.kill().await;
        cancelled
    }

    /// Streams events for one batch until every test reaches a terminal
    /// event, an idle-stream timeout or abnormal exit ends the stream early,
    /// or a per-test absolute deadline expires. Returns `true` if
    /// cancellation interrupted the stream first.
    async fn stream_batch(
        &mut self,
        channel: &mut SubprocessChannel,
        batch: &[TestId],
        cancel_rx: &mut tokio::sync::broadcast::Receiver<()>,
    ) -> bool {
        let batch_len = batch.len();
        let mut state = BatchState::AwaitingStart;
        let mut running: HashMap<TestId, Stopwatch> = HashMap::new();
        let mut display_names: HashMap<TestId, String> = HashMap::new();
        let mut output: HashMap<TestId, CapturedOutput> = HashMap::new();
        let mut remaining: HashSet<TestId> = batch.iter().cloned().collect();

        loop {
            if remaining.is_empty() {
                return false;
            }

            if let Some(hung) = self.find_expired_test(&running) {
                running.remove(&hung);
                remaining.remove(&hung);
                let name = display_name_of(&display_names, &hung);
                info!(supervisor = self.id.0, test = %hung, "absolute deadline exceeded; reporting hang");
                self.record_terminal(
                    hung,
                    name,
                    OutcomeStatus::Hanging {
                        reason: format!(
                            "exceeded {:?} without reporting completion",
                            self.config.hang_timeout * 2
                        ),
                    },
                    None,
                );

                let suspect_threshold = self.config.hang_timeout.mul_f64(0.75);
                let suspects: Vec<TestId> = running
                    .iter()
                    .filter(|(_, sw)| sw.has_elapsed(suspect_threshold))
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in &suspects {
                    running.remove(id);
                    remaining.remove(id);
                }
                if !suspects.is_empty() {
                    info!(
                        supervisor = self.id.0,
                        count = suspects.len(),
                        "siblings past 75% of the hang deadline; suspecting"
                    );
                    self.queue.mark_suspicious(self.id, suspects);
                }

                let residue: Vec<TestId> = remaining.drain().collect();
                self.demote_residue(batch_len, residue);
                return false;
            }

            tokio::select! {
                biased;

                _ = cancel_rx.recv() => {
                    let _ = channel.send(&WireCommand::Cancel).await;
                    return true;
                }

                result = tokio::time::timeout(self.config.stream_timeout, channel.recv()) => {
                    match result {
                        Err(_elapsed) => {
                            debug!(supervisor = self.id.0, batch_len, "idle-stream timeout");
                            let residue: Vec<TestId> = remaining.drain().collect();
                            self.demote_residue_or_attribute(batch_len, residue, StallKind::IdleStream);
                            return false;
                        }
                        Ok(Ok(None)) => {
                            debug!(supervisor = self.id.0, ?state, "worker closed stdout unexpectedly");
                            self.drain_on_abnormal_stop(batch_len, &mut running, &display_names, &mut remaining, &mut output);
                            return false;
                        }
                        Ok(Err(err)) => {
                            warn!(supervisor = self.id.0, %err, "protocol error reading worker stream");
                            self.drain_on_abnormal_stop(batch_len, &mut running, &display_names, &mut remaining, &mut output);
                            return false;
                        }
                        Ok(Ok(Some(event))) => {
                            state = BatchState::Streaming;
                            if matches!(event, Event::RunCompleted | Event::Error { .. }) {
                                if let Event::Error { message, details } = &event {
                                    warn!(message, ?details, "worker reported a run-level error");
                                }
                                self.drain_on_run_completed(&mut running, &display_names, &mut remaining, &mut output);
                                return false;
                            }
                            self.handle_event(event, &mut running, &mut display_names, &mut output, &mut remaining);
                        }
                    }
                }
            }
        }
    }

    /// Applies one non-terminal-for-the-stream event to the in-flight batch
    /// bookkeeping (everything except `RunCompleted`/`Error`, which end the
    /// stream and are handled by the drain helpers directly).
    fn handle_event(
        &self,
        event: Event,
        running: &mut HashMap<TestId, Stopwatch>,
        display_names: &mut HashMap<TestId, String>,
        output: &mut HashMap<TestId, CapturedOutput>,
        remaining: &mut HashSet<TestId>,
    ) {
        match event {
            Event::Discovered { .. } => {}
            Event::TestStarted { id, display_name } => {
                running.insert(id.clone(), Stopwatch::start_now());
                display_names.insert(id.clone(), display_name);
                output.entry(id).or_insert_with(CapturedOutput::empty);
            }
            Event::TestOutput { id, text } => {
                let buf = output.entry(id).or_insert_with(CapturedOutput::empty);
                append_capped(buf, &text, self.config.max_output_bytes);
            }
            Event::TestPassed { id, display_name, duration_ms } => {
                running.remove(&id);
                display_names.remove(&id);
                remaining.remove(&id);
                self.record_terminal_with_duration(
                    id.clone(),
                    display_name,
                    OutcomeStatus::Passed,
                    output.remove(&id),
                    Some(Duration::from_millis(duration_ms)),
                );
            }
            Event::TestFailed {
                id,
                display_name,
                duration_ms,
                error_message,
                stack_trace,
            } => {
                running.remove(&id);
                display_names.remove(&id);
                remaining.remove(&id);
                self.record_terminal_with_duration(
                    id.clone(),
                    display_name,
                    OutcomeStatus::Failed {
                        error_message,
                        stack_trace,
                    },
                    output.remove(&id),
                    Some(Duration::from_millis(duration_ms)),
                );
            }
            Event::TestSkipped { id, display_name, reason } => {
                running.remove(&id);
                display_names.remove(&id);
                remaining.remove(&id);
                self.record_terminal(
                    id.clone(),
                    display_name,
                    OutcomeStatus::Skipped { reason },
                    output.remove(&id),
                );
            }
            Event::RunCompleted | Event::Error { .. } => {
                unreachable!("stream-terminal events are handled by the drain helpers")
            }
        }
    }

    /// The draining rule (§4.3, §7.4): on `RunCompleted`/`Error`, any test
    /// still `running` (started, no terminal event) is `Crashed` directly
    /// regardless of batch size; anything never started is handed to
    /// `Suspicious` -- the culprit is somewhere in the batch but the worker
    /// gave us no attribution for it.
    fn drain_on_run_completed(
        &self,
        running: &mut HashMap<TestId, Stopwatch>,
        display_names: &HashMap<TestId, String>,
        remaining: &mut HashSet<TestId>,
        output: &mut HashMap<TestId, CapturedOutput>,
    ) {
        for (id, _) in running.drain() {
            remaining.remove(&id);
            let name = display_name_of(display_names, &id);
            self.record_terminal(
                id.clone(),
                name,
                OutcomeStatus::Crashed {
                    reason: "did not report completion".to_owned(),
                },
                output.remove(&id),
            );
        }
        let never_started: Vec<TestId> = remaining.drain().collect();
        if !never_started.is_empty() {
            self.queue.mark_suspicious(self.id, never_started);
        }
    }

    /// An abnormal stop (closed stdout or a protocol error with no
    /// `RunCompleted`/`Error` seen) applies the same draining split per §7.3
    /// ("tests still running become Crashed; remaining assigned tests are
    /// re-queued at the next tier"), except the never-started remainder is
    /// demoted by batch size (Confirmed/Suspicious) rather than always
    /// Suspicious, since an abnormal exit is stronger evidence of a crash
    /// than a merely-idle stream.
    fn drain_on_abnormal_stop(
        &self,
        batch_len: usize,
        running: &mut HashMap<TestId, Stopwatch>,
        display_names: &HashMap<TestId, String>,
        remaining: &mut HashSet<TestId>,
        output: &mut HashMap<TestId, CapturedOutput>,
    ) {
        let mut attributed_any = false;
        for (id, _) in running.drain() {
            remaining.remove(&id);
            attributed_any = true;
            let name = display_name_of(display_names, &id);
            self.record_terminal(
                id.clone(),
                name,
                OutcomeStatus::Crashed {
                    reason: "worker exited without reporting completion".to_owned(),
                },
                output.remove(&id),
            );
        }
        let never_started: Vec<TestId> = remaining.drain().collect();
        if never_started.is_empty() {
            return;
        }
        if !attributed_any {
            // Nothing was identifiably running when the worker died; fall
            // back to the blame-attribution policy (direct Crashed at size
            // one, size-based demotion otherwise).
            self.demote_residue_or_attribute(batch_len, never_started, StallKind::AbnormalExit);
        } else {
            self.demote_residue(batch_len, never_started);
        }
    }

    /// Routes batch residue per the §4.2/§4.3 tables: a small batch
    /// (`<= small_batch_threshold`, and `> 1`) goes to `Confirmed`; a larger
    /// one goes to `Suspicious`.
    fn demote_residue(&self, batch_len: usize, residue: Vec<TestId>) {
        if residue.is_empty() {
            return;
        }
        if batch_len <= self.config.small_batch_threshold {
            debug!(
                supervisor = self.id.0,
                count = residue.len(),
                "demoting small-batch residue to Confirmed"
            );
            self.queue.mark_confirmed(self.id, residue);
        } else {
            debug!(
                supervisor = self.id.0,
                count = residue.len(),
                "demoting large-batch residue to Suspicious"
            );
            self.queue.mark_suspicious(self.id, residue);
        }
    }

    /// Like [`Supervisor::demote_residue`], but a single-test batch
    /// attributes directly instead of looping back through `Confirmed`
    /// (there is nowhere smaller to bisect to): an idle stream becomes
    /// `Hanging`, an abnormal exit becomes `Crashed`.
    fn demote_residue_or_attribute(&self, batch_len: usize, residue: Vec<TestId>, kind: StallKind) {
        if residue.is_empty() {
            return;
        }
        if batch_len == 1 {
            let id = residue.into_iter().next().expect("checked non-empty");
            let status = match kind {
                StallKind::IdleStream => OutcomeStatus::Hanging {
                    reason: format!(
                        "no event within {:?} running alone",
                        self.config.stream_timeout
                    ),
                },
                StallKind::AbnormalExit => OutcomeStatus::Crashed {
                    reason: "worker exited without reporting completion".to_owned(),
                },
            };
            let name = id.as_str().to_owned();
            self.record_terminal(id, name, status, None);
            return;
        }
        self.demote_residue(batch_len, residue);
    }

    /// The first test (if any) whose elapsed running time exceeds
    /// `2 * hang_timeout` -- the absolute deadline past which it is
    /// unambiguously `Hanging` regardless of batch size.
    fn find_expired_test(&self, running: &HashMap<TestId, Stopwatch>) -> Option<TestId> {
        let deadline = self.config.hang_timeout * 2;
        running
            .iter()
            .find(|(_, sw)| sw.has_elapsed(deadline))
            .map(|(id, _)| id.clone())
    }

    fn record_terminal(
        &self,
        id: TestId,
        display_name: String,
        status: OutcomeStatus,
        output: Option<CapturedOutput>,
    ) {
        self.record_terminal_with_duration(id, display_name, status, output, None)
    }

    fn record_terminal_with_duration(
        &self,
        id: TestId,
        display_name: String,
        status: OutcomeStatus,
        output: Option<CapturedOutput>,
        duration: Option<Duration>,
    ) {
        self.queue.mark_completed(self.id, &id);
        if let Err(err) = self.sink.record(Outcome {
            test_id: id,
            display_name,
            status,
            duration,
            output,
            recorded_at: chrono::Local::now(),
        }) {
            warn!(%err, "ignoring duplicate outcome (already recorded by another supervisor)");
        }
    }
}

/// The worker-reported display name for `id` if one was ever seen (i.e. a
/// `TestStarted` event arrived for it), falling back to the bare test id for
/// tests attributed without ever having started.
fn display_name_of(display_names: &HashMap<TestId, String>, id: &TestId) -> String {
    display_names
        .get(id)
        .cloned()
        .unwrap_or_else(|| id.as_str().to_owned())
}

/// Appends `text` to `buf`, capping total bytes at `max_bytes` and setting
/// `truncated` the first time the cap is reached instead of growing
/// unbounded.
fn append_capped(buf: &mut CapturedOutput, text: &str, max_bytes: u64) {
    if buf.truncated {
        return;
    }
    let max_bytes = max_bytes as usize;
    let remaining = max_bytes.saturating_sub(buf.text.len());
    if remaining == 0 {
        buf.truncated = true;
        return;
    }
    if text.len() <= remaining {
        buf.text.push_str(text);
    } else {
        buf.text.push_str(&text[..remaining]);
        buf.truncated = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Tier;

    #[test]
    fn append_capped_stops_growing_once_the_cap_is_reached() {
        let mut buf = CapturedOutput::empty();
        append_capped(&mut buf, "hello ", 10);
        append_capped(&mut buf, "world and more", 10);
        assert_eq!(buf.text.len(), 10);
        assert!(buf.truncated);
    }

    #[test]
    fn append_capped_is_a_no_op_once_already_truncated() {
        let mut buf = CapturedOutput {
            text: "0123456789".to_owned(),
            truncated: true,
        };
        append_capped(&mut buf, "more", 10);
        assert_eq!(buf.text, "0123456789");
    }

    fn test_supervisor(tests: &[&str]) -> Supervisor {
        let ids: Vec<TestId> = tests.iter().map(|t| TestId::new(*t)).collect();
        let queue = Arc::new(WorkQueue::new(ids.clone()));
        let sup = SupervisorId(0);
        queue.take_batch(sup, ids.len().max(1));
        Supervisor {
            id: sup,
            queue,
            sink: Arc::new(OutcomeSink::new()),
            batch_size: Arc::new(BatchSizeController::with_initial(50)),
            config: RunnerConfig {
                small_batch_threshold: 10,
                ..RunnerConfig::default()
            },
            spawn_spec: WorkerSpawnSpec {
                program: "unused".to_owned(),
                args: Vec::new(),
                envs: Vec::new(),
                assembly_path: "unused".to_owned(),
            },
            cancellation: CancellationToken::for_test(),
        }
    }

    #[test]
    fn demote_residue_routes_by_small_batch_threshold() {
        let sup = test_supervisor(&["a", "b", "c"]);
        sup.demote_residue(3, vec![TestId::new("a"), TestId::new("b"), TestId::new("c")]);
        for id in ["a", "b", "c"] {
            assert_eq!(
                sup.queue.tier_of(&TestId::new(id)),
                Some(Tier::Confirmed),
                "batch of 3 is <= the small-batch threshold"
            );
        }
    }

    #[test]
    fn demote_residue_goes_to_suspicious_above_the_threshold() {
        let sup = test_supervisor(&["x0"]);
        sup.demote_residue(12, vec![TestId::new("x0")]);
        assert_eq!(
            sup.queue.tier_of(&TestId::new("x0")),
            Some(Tier::Suspicious)
        );
    }

    #[test]
    fn size_one_idle_timeout_attributes_hanging_directly_instead_of_looping_to_confirmed() {
        let sup = test_supervisor(&["h"]);
        sup.demote_residue_or_attribute(1, vec![TestId::new("h")], StallKind::IdleStream);
        let outcome = sup.sink.snapshot();
        assert_eq!(outcome.len(), 1);
        assert!(matches!(outcome[0].status, OutcomeStatus::Hanging { .. }));
        assert_eq!(sup.queue.tier_of(&TestId::new("h")), None);
    }

    #[test]
    fn size_one_abnormal_exit_attributes_crashed_directly() {
        let sup = test_supervisor(&["c"]);
        sup.demote_residue_or_attribute(1, vec![TestId::new("c")], StallKind::AbnormalExit);
        let outcome = sup.sink.snapshot();
        assert_eq!(outcome.len(), 1);
        assert!(matches!(outcome[0].status, OutcomeStatus::Crashed { .. }));
    }

    #[test]
    fn draining_a_run_completed_attributes_running_tests_as_crashed_and_demotes_the_rest() {
        let sup = test_supervisor(&["started", "never_started"]);
        let mut running = HashMap::new();
        running.insert(TestId::new("started"), Stopwatch::start_now());
        let mut display_names = HashMap::new();
        display_names.insert(TestId::new("started"), "Started Test".to_owned());
        let mut remaining: HashSet<TestId> =
            [TestId::new("started"), TestId::new("never_started")].into_iter().collect();
        let mut output = HashMap::new();

        sup.drain_on_run_completed(&mut running, &display_names, &mut remaining, &mut output);

        let outcomes = sup.sink.snapshot();
        assert_eq!(outcomes.len(), 1, "only the started test gets a direct outcome");
        assert_eq!(outcomes[0].test_id, TestId::new("started"));
        assert_eq!(outcomes[0].display_name, "Started Test");
        assert!(matches!(outcomes[0].status, OutcomeStatus::Crashed { .. }));
        assert_eq!(
            sup.queue.tier_of(&TestId::new("never_started")),
            Some(Tier::Suspicious),
            "a test that never started is demoted, not attributed"
        );
    }

    #[test]
    fn find_expired_test_only_flags_tests_past_twice_the_hang_timeout() {
        let sup = test_supervisor(&["slow"]);
        let mut running = HashMap::new();
        running.insert(TestId::new("slow"), Stopwatch::start_now());
        assert_eq!(sup.find_expired_test(&running), None, "just started, nowhere near the deadline");
    }

    #[tokio::test]
    async fn a_spawn_failure_at_batch_size_one_attributes_crashed_instead_of_looping_forever() {
        let mut sup = test_supervisor(&["only"]);
        sup.spawn_spec.program = "/nonexistent/definitely-not-a-real-binary".to_owned();
        let mut cancel_rx = sup.cancellation.subscribe();

        let cancelled = sup.run_batch(vec![TestId::new("only")], &mut cancel_rx).await;

        assert!(!cancelled);
        let outcomes = sup.sink.snapshot();
        assert_eq!(outcomes.len(), 1, "the single test must get a recorded outcome");
        assert!(matches!(outcomes[0].status, OutcomeStatus::Crashed { .. }));
        assert_eq!(
            sup.queue.tier_of(&TestId::new("only")),
            None,
            "attributed tests leave the queue rather than looping through Suspicious"
        );
    }
}
