// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Windows process-tree termination via Job Objects: every worker is
//! assigned to a job created with `JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE`, so
//! `TerminateJobObject` takes the whole descendant tree with it -- there is
//! no process-group equivalent to rely on.

use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::debug;
use win32job::{ExtendedLimitInfo, Job};
use windows_sys::Win32::System::JobObjects::TerminateJobObject;

/// No spawn-time preparation is needed on Windows; the job is created after
/// spawn in [`assign_to_job`].
pub fn prepare_command(_cmd: &mut Command) {}

/// Creates a job configured to kill all of its processes when closed, and
/// assigns `child` to it. The caller must keep the returned `Job` alive for
/// as long as the worker should be tracked; dropping it kills the tree, the
/// Windows analog of the Unix process-group signal in [`super::unix`].
pub fn assign_to_job(child: &Child) -> Result<Job, win32job::JobError> {
    let job = Job::create()?;
    let mut info = ExtendedLimitInfo::new();
    info.limit_kill_on_job_close();
    job.set_extended_limit_info(&info)?;
    if let Some(handle) = child.raw_handle() {
        job.assign_process(handle as _)?;
    }
    Ok(job)
}

/// Terminates the worker's whole process tree: `TerminateJobObject` on
/// `job` (if one was successfully created at spawn time) kills every process
/// still in it, then `child.start_kill()` force-kills the immediate child
/// directly for good measure, in case it was never assigned to the job (see
/// the warning logged in [`crate::channel::SubprocessChannel::spawn`]).
///
/// `grace` is accepted for signature parity with [`super::unix::terminate_tree`]
/// but unused here: `TerminateJobObject` is immediate, there is nothing to
/// wait out before escalating.
pub async fn terminate_tree(job: Option<&Job>, child: &mut Child, _grace: Duration) {
    if let Some(job) = job {
        let handle = job.handle();
        // SAFETY: Win32 call, handle is owned by `job` and still valid.
        let ok = unsafe { TerminateJobObject(handle as _, 1) };
        if ok == 0 {
            debug!("TerminateJobObject failed, likely because the process already exited");
        }
    }
    let _ = child.start_kill();
}

/// Terminates a job by its raw handle value, for the interrupt-sweep registry
/// (§5.1), which tracks stragglers across supervisors and so cannot hold an
/// owned `Job`/`Child` the way [`terminate_tree`] does for its own worker.
///
/// `raw_handle` may outlive the `Job` it came from if the worker has already
/// exited and closed it; `TerminateJobObject` on a stale or reused handle
/// simply fails or no-ops, the same best-effort tradeoff the pid-based Unix
/// sweep makes against pid reuse.
pub fn force_terminate_job_handle(raw_handle: isize) {
    // SAFETY: Win32 call on a handle value the registry copied out of a
    // `Job` at spawn time; worst case it is stale and the call fails.
    let ok = unsafe { TerminateJobObject(raw_handle as _, 1) };
    if ok == 0 {
        debug!("TerminateJobObject (sweep) failed, likely because the process already exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminate_tree_without_a_job_still_kills_the_child_directly() {
        let mut child = tokio::process::Command::new("cmd")
            .args(["/C", "ping -n 30 127.0.0.1 >NUL"])
            .spawn()
            .unwrap();
        terminate_tree(None, &mut child, Duration::from_millis(1)).await;
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("child should exit promptly after start_kill");
        assert!(status.is_ok());
    }
}
