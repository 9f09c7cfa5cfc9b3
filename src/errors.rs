// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the scheduler.

use crate::queue::TestId;
use camino::Utf8PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// An error that occurred while parsing the runner config.
#[derive(Debug, Error)]
#[error("failed to parse runner config at `{config_file:?}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    pub(crate) config_file: Option<Utf8PathBuf>,
    #[source]
    pub(crate) err: config::ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: Option<Utf8PathBuf>, err: config::ConfigError) -> Self {
        Self { config_file, err }
    }
}

/// An error that occurred while spawning a worker subprocess.
#[derive(Debug, Error, Clone)]
#[error("failed to spawn worker process `{program}`")]
pub struct ChildSpawnError {
    pub(crate) program: String,
    #[source]
    pub(crate) err: Arc<std::io::Error>,
}

impl ChildSpawnError {
    pub(crate) fn new(program: impl Into<String>, err: std::io::Error) -> Self {
        Self {
            program: program.into(),
            err: Arc::new(err),
        }
    }
}

/// An error that occurred while reading or writing a framed protocol message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The line read from the worker's stdout was not valid UTF-8 or did not
    /// parse as a known event.
    #[error("malformed event frame: {line:?}")]
    MalformedFrame {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// An I/O error occurred while talking to the worker over its pipes.
    #[error("I/O error communicating with worker")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// An error recording an outcome that has already been recorded once.
///
/// Per the one-way completion invariant, this should never happen in
/// practice; it is surfaced rather than silently overwriting so that a bug in
/// the supervisor loop is loud rather than silently corrupting the sink.
#[derive(Debug, Error)]
#[error("outcome for test `{0}` was already recorded")]
pub struct DuplicateOutcomeError(pub TestId);

/// An error building a [`crate::runner::Runner`].
#[derive(Debug, Error)]
pub enum RunnerBuildError {
    /// Creating the underlying Tokio runtime failed.
    #[error("failed to create the Tokio runtime")]
    TokioRuntimeCreate(#[source] std::io::Error),

    /// Setting up the OS signal handler failed.
    #[error("failed to set up signal handling")]
    SignalHandlerSetup(#[source] std::io::Error),

    /// The supplied test list was empty.
    #[error("no tests were supplied to the runner")]
    EmptyTestList,
}

/// Errors returned from a single worker supervision batch.
///
/// This is not surfaced to callers of [`crate::runner::Runner::execute`] (a
/// batch's failure is handled entirely by demoting its residue to a lower
/// tier), but is used internally for `tracing` diagnostics.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The worker process could not be spawned at all.
    #[error(transparent)]
    Spawn(#[from] ChildSpawnError),

    /// A framed message from the worker could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
