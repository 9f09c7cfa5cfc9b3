// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker wire protocol (§6): line-delimited, internally-tagged JSON
//! records flowing in both directions over a worker subprocess's standard
//! streams.
//!
//! Each line is exactly one frame. A reader buffers bytes until a `\n` is
//! seen before attempting to deserialize, so the protocol is robust to
//! partial writes; a line that fails to deserialize surfaces as
//! [`crate::errors::ProtocolError::MalformedFrame`] rather than panicking.

mod framing;

pub use framing::{read_event, write_command};

use crate::test_id::TestId;
use serde::{Deserialize, Serialize};

/// Commands sent from the supervisor to the worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    /// Worker replies with one `Discovered` event, then exits or awaits the
    /// next command.
    Discover { assembly_path: String },

    /// Worker emits a stream of events culminating in `RunCompleted` or
    /// `Error`.
    Run {
        assembly_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tests: Option<Vec<TestId>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u64>,
    },

    /// Advisory request to stop; the worker should end its stream promptly.
    Cancel,
}

/// A single discovered test, reported in a `Discovered` event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveredTest {
    pub id: TestId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

/// Events sent from the worker to the supervisor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    Discovered { tests: Vec<DiscoveredTest> },
    TestStarted { id: TestId, display_name: String },
    TestOutput { id: TestId, text: String },
    TestPassed {
        id: TestId,
        display_name: String,
        duration_ms: u64,
    },
    TestFailed {
        id: TestId,
        display_name: String,
        duration_ms: u64,
        error_message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack_trace: Option<String>,
    },
    TestSkipped {
        id: TestId,
        display_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    RunCompleted,
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl Event {
    /// `true` for the two events that end a healthy stream (§6 stable
    /// guarantees): `RunCompleted` and `Error`.
    pub fn is_terminal_for_stream(&self) -> bool {
        matches!(self, Event::RunCompleted | Event::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_through_json() {
        let cmd = Command::Run {
            assembly_path: "tests.dll".to_owned(),
            tests: Some(vec![TestId::new("a"), TestId::new("b")]),
            timeout_seconds: Some(30),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let back: Command = serde_json::from_str(&json).unwrap();
        match back {
            Command::Run {
                assembly_path,
                tests,
                timeout_seconds,
            } => {
                assert_eq!(assembly_path, "tests.dll");
                assert_eq!(tests.unwrap().len(), 2);
                assert_eq!(timeout_seconds, Some(30));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn event_tag_is_the_type_field() {
        let event = Event::TestPassed {
            id: TestId::new("a"),
            display_name: "a".to_owned(),
            duration_ms: 12,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"TestPassed\""));
    }

    #[test]
    fn run_completed_and_error_are_stream_terminal() {
        assert!(Event::RunCompleted.is_terminal_for_stream());
        assert!(Event::Error {
            message: "boom".to_owned(),
            details: None
        }
        .is_terminal_for_stream());
        assert!(!Event::TestOutput {
            id: TestId::new("a"),
            text: String::new()
        }
        .is_terminal_for_stream());
    }
}
