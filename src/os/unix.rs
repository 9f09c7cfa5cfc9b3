// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unix process-tree termination: put the worker in its own process group at
//! spawn time, then signal the whole group by its negated pid.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Puts the child in a new process group headed by itself, so that
/// everything it spawns can be signaled together later.
pub fn prepare_command(cmd: &mut Command) {
    cmd.process_group(0);
}

/// Sends `SIGTERM` to the worker's process group, waits up to `grace` for it
/// to exit, then escalates to `SIGKILL` for the group if it hasn't.
///
/// Idempotent: signaling an already-dead group returns `ESRCH`, which is
/// treated as success.
pub async fn terminate_tree(pid: u32, grace: Duration) {
    let group = Pid::from_raw(-(pid as i32));

    if let Err(err) = signal::kill(group, Signal::SIGTERM) {
        if err != nix::errno::Errno::ESRCH {
            warn!(pid, %err, "SIGTERM to worker process group failed");
        }
        return;
    }
    debug!(pid, "sent SIGTERM to worker process group");

    tokio::time::sleep(grace).await;

    match signal::kill(group, Signal::SIGKILL) {
        Ok(()) => debug!(pid, "sent SIGKILL to worker process group after grace period"),
        Err(nix::errno::Errno::ESRCH) => {
            debug!(pid, "worker process group already exited before SIGKILL")
        }
        Err(err) => warn!(pid, %err, "SIGKILL to worker process group failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminate_tree_on_a_nonexistent_pid_does_not_panic() {
        // A pid this high is vanishingly unlikely to be a live process group
        // leader on any real system.
        terminate_tree(999_999, Duration::from_millis(1)).await;
    }
}
