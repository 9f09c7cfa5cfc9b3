// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A scripted worker used only by this crate's own tests.
//!
//! Speaks the §6 wire protocol over stdin/stdout. Behavior for each test id
//! is controlled entirely by environment variables so integration tests can
//! script hangs, crashes, and failures without a real test framework:
//!
//! - `FIXTURE_HANG=<id>[,<id>...]`: never emit a terminal event for these
//!   ids; the process just sleeps past any reasonable timeout.
//! - `FIXTURE_FAIL=<id>[,<id>...]`: emit `TestFailed` for these ids.
//! - `FIXTURE_SKIP=<id>[,<id>...]`: emit `TestSkipped` for these ids.
//! - `FIXTURE_CRASH_AFTER=<id>`: exit the process (without `RunCompleted` or
//!   a terminal event for this test) immediately after sending its
//!   `TestStarted`, simulating a worker that dies mid-test.
//! - `FIXTURE_TEST_DURATION_MS=<n>`: artificial delay before each test's
//!   terminal event, default 1.

use resilient_test_runner::protocol::{Command, DiscoveredTest, Event};
use std::collections::HashSet;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn env_id_set(var: &str) -> HashSet<String> {
    std::env::var(var)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[tokio::main]
async fn main() {
    let hang = env_id_set("FIXTURE_HANG");
    let fail = env_id_set("FIXTURE_FAIL");
    let skip = env_id_set("FIXTURE_SKIP");
    let crash_after = std::env::var("FIXTURE_CRASH_AFTER").ok();
    let test_duration_ms: u64 = std::env::var("FIXTURE_TEST_DURATION_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut stdout = tokio::io::stdout();

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await.unwrap_or(0);
        if bytes_read == 0 {
            return;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let command: Command = match serde_json::from_str(line) {
            Ok(c) => c,
            Err(_) => continue,
        };

        match command {
            Command::Discover { .. } => {
                send(
                    &mut stdout,
                    &Event::Discovered {
                        tests: vec![DiscoveredTest {
                            id: "placeholder".into(),
                            display_name: "placeholder".to_owned(),
                            skip_reason: None,
                        }],
                    },
                )
                .await;
            }
            Command::Run { tests, .. } => {
                let tests = tests.unwrap_or_default();
                for id in tests {
                    let id_str = id.as_str().to_owned();

                    send(
                        &mut stdout,
                        &Event::TestStarted {
                            id: id.clone(),
                            display_name: id_str.clone(),
                        },
                    )
                    .await;

                    if hang.contains(&id_str) {
                        // Never report a terminal event for this test.
                        loop {
                            tokio::time::sleep(Duration::from_secs(3600)).await;
                        }
                    }

                    if crash_after.as_deref() == Some(id_str.as_str()) {
                        std::process::exit(70);
                    }

                    tokio::time::sleep(Duration::from_millis(test_duration_ms)).await;

                    let event = if skip.contains(&id_str) {
                        Event::TestSkipped {
                            id: id.clone(),
                            display_name: id_str.clone(),
                            reason: Some("scripted skip".to_owned()),
                        }
                    } else if fail.contains(&id_str) {
                        Event::TestFailed {
                            id: id.clone(),
                            display_name: id_str.clone(),
                            duration_ms: test_duration_ms,
                            error_message: "scripted failure".to_owned(),
                            stack_trace: None,
                        }
                    } else {
                        Event::TestPassed {
                            id: id.clone(),
                            display_name: id_str.clone(),
                            duration_ms: test_duration_ms,
                        }
                    };
                    send(&mut stdout, &event).await;
                }
                send(&mut stdout, &Event::RunCompleted).await;
            }
            Command::Cancel => return,
        }
    }
}

async fn send(stdout: &mut tokio::io::Stdout, event: &Event) {
    let mut line = serde_json::to_string(event).expect("Event serialization cannot fail");
    line.push('\n');
    let _ = stdout.write_all(line.as_bytes()).await;
    let _ = stdout.flush().await;
}
