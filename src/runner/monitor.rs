// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The tier promotion monitor (§4.5): a single background task that watches
//! for the moment every supervisor has drained `Pending`, then promotes
//! `Suspicious` back into `Pending` and steps the batch size down -- the
//! engine of the bisection algorithm (§9).

use crate::batch_size::BatchSizeController;
use crate::config::RunnerConfig;
use crate::queue::WorkQueue;
use crate::signal::CancellationToken;
use std::sync::Arc;
use tracing::{debug, info};

pub struct TierPromotionMonitor {
    queue: Arc<WorkQueue>,
    batch_size: Arc<BatchSizeController>,
    config: RunnerConfig,
    cancellation: CancellationToken,
}

impl TierPromotionMonitor {
    pub fn new(
        queue: Arc<WorkQueue>,
        batch_size: Arc<BatchSizeController>,
        config: RunnerConfig,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            queue,
            batch_size,
            config,
            cancellation,
        }
    }

    /// Polls [`WorkQueue::can_promote`] until the queue is complete or
    /// cancellation fires, promoting and stepping the batch size down each
    /// quiescent moment.
    ///
    /// The batch size is stepped even when nothing was in `Suspicious` to
    /// promote: once only `Confirmed` residue remains (reached directly by
    /// a small batch per §4.3, without ever passing through `Suspicious`),
    /// `Pending` and every assigned set are already empty, so every tick
    /// would otherwise see `can_promote` true forever without the batch size
    /// ever reaching 1 -- the only size at which `TakeBatch` draws from
    /// `Confirmed` (§4.1). Stepping unconditionally here is what gets it
    /// there, and is safe: `can_promote` requires `Pending` empty, so a
    /// genuine `Suspicious` promotion makes `Pending` non-empty again and
    /// the next tick's `can_promote` is false until it drains once more.
    pub async fn run(self) {
        let mut cancel_rx = self.cancellation.subscribe();
        loop {
            if self.queue.is_complete() {
                break;
            }
            if self.queue.can_promote() {
                let promoted = self.queue.promote_suspicious();
                let new_size = self.batch_size.step();
                if promoted > 0 {
                    info!(
                        promoted,
                        new_batch_size = new_size,
                        "promoted Suspicious to Pending and narrowed batch size"
                    );
                } else {
                    debug!(
                        new_batch_size = new_size,
                        "promotion eligible but nothing in Suspicious; narrowing toward Confirmed isolation"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.monitor_poll_interval) => {}
                _ = cancel_rx.recv() => break,
            }
        }
    }
}
