// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interrupt handling (§5.1): a dedicated task listens for Ctrl-C / SIGTERM,
//! broadcasts a cancellation signal to every supervisor on the first one,
//! and force-sweeps every live worker process tree on a second.

use tokio::sync::broadcast;
use tracing::{info, warn};

/// Cloned by every supervisor; `recv`-ing (or observing the sender side has
/// already fired) means "stop taking new batches and end the current one
/// promptly".
#[derive(Clone)]
pub struct CancellationToken {
    tx: broadcast::Sender<()>,
}

impl CancellationToken {
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Builds a token without spawning a signal-listening task, for tests
    /// that need to trigger cancellation deterministically.
    #[cfg(test)]
    pub(crate) fn for_test() -> Self {
        let (tx, _rx) = broadcast::channel(1);
        Self { tx }
    }

    #[cfg(test)]
    pub(crate) fn cancel_for_test(&self) {
        let _ = self.tx.send(());
    }
}

/// Spawns the signal-listening task and returns a token supervisors can
/// subscribe to for cancellation.
///
/// The first Ctrl-C/SIGTERM broadcasts on the token and lets the run wind
/// down batch-by-batch; a second forcibly sweeps every registered worker
/// process tree via [`crate::channel::terminate_all_registered`], for a
/// user who doesn't want to wait out even a single in-flight batch.
pub fn install() -> Result<CancellationToken, crate::errors::RunnerBuildError> {
    let (tx, _rx) = broadcast::channel(1);
    let token = CancellationToken { tx: tx.clone() };

    tokio::spawn(async move {
        if wait_for_interrupt().await.is_err() {
            warn!("failed to install signal handler; interrupts will not be handled gracefully");
            return;
        }
        info!("received interrupt, winding down in-flight batches");
        let _ = tx.send(());

        if wait_for_interrupt().await.is_ok() {
            warn!("received second interrupt, force-killing all worker processes");
            crate::channel::terminate_all_registered().await;
        }
    });

    Ok(token)
}

#[cfg(unix)]
async fn wait_for_interrupt() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => Ok(()),
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(windows)]
async fn wait_for_interrupt() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_observe_a_broadcast_send() {
        let (tx, _rx) = broadcast::channel(1);
        let token = CancellationToken { tx };
        let mut rx1 = token.subscribe();
        let mut rx2 = token.subscribe();
        token.tx.send(()).unwrap();
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }
}
