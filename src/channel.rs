// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The subprocess channel (§4.4): owns one worker process's stdin/stdout and
//! exposes the wire protocol over it, plus process-tree-aware termination.

use crate::errors::{BatchError, ChildSpawnError, ProtocolError};
use crate::protocol::{read_event, write_command, Command as WireCommand, Event};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// Grace period between sending a termination request and escalating to a
/// hard kill. Not part of [`crate::config::RunnerConfig`] because it is an
/// OS-interaction constant rather than a scheduling policy knob.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// What the interrupt-sweep registry needs to force-kill a straggler: a pid
/// on Unix (`kill(2)` by pid), the raw Job Object handle value on Windows
/// (`TerminateJobObject` doesn't need an owned `Child`/`Job`).
#[cfg(unix)]
type RegistryToken = u32;
#[cfg(windows)]
type RegistryToken = isize;

/// Process-wide registry of every live worker's [`RegistryToken`], so a
/// signal handler can sweep all of them on interrupt (§5.1) without
/// threading a reference through every supervisor.
fn registry() -> &'static Mutex<Vec<RegistryToken>> {
    static REGISTRY: OnceLock<Mutex<Vec<RegistryToken>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

fn register(token: RegistryToken) {
    registry().lock().unwrap().push(token);
}

fn unregister(token: RegistryToken) {
    registry().lock().unwrap().retain(|&t| t != token);
}

/// Force-terminates every process-tree currently registered by a live
/// [`SubprocessChannel`]. Called once by the signal-handling task (§5.1)
/// when a second interrupt arrives during shutdown.
pub async fn terminate_all_registered() {
    let tokens: Vec<RegistryToken> = registry().lock().unwrap().clone();
    #[cfg(unix)]
    for pid in tokens {
        crate::os::terminate_tree(pid, Duration::from_millis(0)).await;
    }
    #[cfg(windows)]
    for handle in tokens {
        crate::os::force_terminate_job_handle(handle);
    }
}

/// Owns one worker subprocess and the framed protocol over its stdio.
pub struct SubprocessChannel {
    child: Child,
    pid: u32,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    killed: AtomicBool,
    #[cfg(windows)]
    job: Option<win32job::Job>,
    registry_token: Option<RegistryToken>,
}

impl SubprocessChannel {
    /// Spawns `program` with `args`, wiring up piped stdin/stdout and
    /// placing it in its own process tree (process group on Unix, Job
    /// Object on Windows) so the whole tree can be killed together later.
    ///
    /// `envs` is applied on top of the supervisor process's own environment,
    /// letting callers pin per-worker configuration without mutating global
    /// process state shared by concurrently running tests.
    pub fn spawn(
        program: &str,
        args: &[String],
        envs: &[(String, String)],
    ) -> Result<Self, ChildSpawnError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        crate::os::prepare_command(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|err| ChildSpawnError::new(program, err))?;

        let pid = child.id().expect("spawned child always has a pid");
        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");

        #[cfg(windows)]
        let job = match crate::os::assign_to_job(&child) {
            Ok(job) => Some(job),
            Err(err) => {
                warn!(pid, %err, "failed to assign worker to a job object");
                None
            }
        };

        #[cfg(unix)]
        let registry_token: Option<RegistryToken> = Some(pid);
        #[cfg(windows)]
        let registry_token: Option<RegistryToken> = job.as_ref().map(|j| j.handle() as isize);

        if let Some(token) = registry_token {
            register(token);
        }
        debug!(pid, program, "spawned worker process");

        Ok(Self {
            child,
            pid,
            stdin,
            stdout: BufReader::new(stdout),
            killed: AtomicBool::new(false),
            #[cfg(windows)]
            job,
            registry_token,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Sends one command to the worker's stdin.
    pub async fn send(&mut self, command: &WireCommand) -> Result<(), BatchError> {
        write_command(&mut self.stdin, command)
            .await
            .map_err(BatchError::Protocol)
    }

    /// Reads the next event from the worker's stdout, or `None` on clean
    /// EOF.
    pub async fn recv(&mut self) -> Result<Option<Event>, ProtocolError> {
        read_event(&mut self.stdout).await
    }

    /// `true` if the underlying process has already exited.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// The process's exit code, once it has exited. Panics if called before
    /// the process has actually exited; callers should check
    /// [`SubprocessChannel::has_exited`] first or have just awaited
    /// [`SubprocessChannel::wait`].
    pub fn exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            _ => None,
        }
    }

    /// Waits for the worker to exit on its own.
    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    /// Terminates the worker's whole process tree. Idempotent: a second
    /// call after the process has already exited is a no-op.
    pub async fn kill(&mut self) {
        if self.killed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.has_exited() {
            return;
        }
        #[cfg(unix)]
        crate::os::terminate_tree(self.pid, KILL_GRACE).await;
        #[cfg(windows)]
        crate::os::terminate_tree(self.job.as_ref(), &mut self.child, KILL_GRACE).await;
    }
}

impl Drop for SubprocessChannel {
    fn drop(&mut self) {
        if let Some(token) = self.registry_token {
            unregister(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn unregister_removes_only_the_matching_pid() {
        register(111);
        register(222);
        unregister(111);
        let pids = registry().lock().unwrap().clone();
        assert!(!pids.contains(&111));
        // Another test running concurrently may also have registered pids;
        // just check ours is gone and 222 (registered by us) survives if
        // nothing else unregistered it first.
        unregister(222);
    }
}
