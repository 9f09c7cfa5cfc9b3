// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Line-delimited JSON framing over the worker's stdin/stdout (§6.1).

use super::{Command, Event};
use crate::errors::ProtocolError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Reads one frame from `reader`.
///
/// Returns `Ok(None)` on a clean EOF (the worker closed its stdout without
/// sending anything more, e.g. after `RunCompleted`). A line containing only
/// whitespace is skipped rather than treated as a malformed frame, since some
/// runtimes flush a trailing blank line on process exit.
pub async fn read_event<R>(reader: &mut R) -> Result<Option<Event>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.trim().is_empty() {
            continue;
        }
        return serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|source| ProtocolError::MalformedFrame {
                line: trimmed.to_owned(),
                source,
            });
    }
}

/// Serializes `command` as one JSON line and writes it to `writer`, flushing
/// so the worker observes it immediately rather than waiting on its own
/// stdin buffering.
pub async fn write_command<W>(writer: &mut W, command: &Command) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(command).expect("Command serialization cannot fail");
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_id::TestId;

    #[tokio::test]
    async fn read_event_skips_blank_lines_and_parses_the_next_frame() {
        let input = b"\n   \n{\"type\":\"RunCompleted\"}\n".to_vec();
        let mut reader = std::io::Cursor::new(input);
        let event = read_event(&mut reader).await.unwrap();
        assert!(matches!(event, Some(Event::RunCompleted)));
    }

    #[tokio::test]
    async fn read_event_returns_none_on_clean_eof() {
        let mut reader = std::io::Cursor::new(Vec::new());
        assert!(read_event(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_event_surfaces_malformed_json_as_a_protocol_error() {
        let mut reader = std::io::Cursor::new(b"not json at all\n".to_vec());
        let err = read_event(&mut reader).await.unwrap_err();
        match err {
            ProtocolError::MalformedFrame { line, .. } => assert_eq!(line, "not json at all"),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_command_emits_one_newline_terminated_json_line() {
        let mut buf = Vec::new();
        write_command(&mut buf, &Command::Cancel).await.unwrap();
        assert_eq!(buf, b"{\"type\":\"Cancel\"}\n");
    }

    #[tokio::test]
    async fn round_trips_a_run_command_through_write_and_a_discover_through_read() {
        let mut buf = Vec::new();
        write_command(
            &mut buf,
            &Command::Run {
                assembly_path: "a.dll".to_owned(),
                tests: Some(vec![TestId::new("t1")]),
                timeout_seconds: None,
            },
        )
        .await
        .unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let mut line = String::new();
        tokio::io::AsyncBufReadExt::read_line(&mut cursor, &mut line)
            .await
            .unwrap();
        let cmd: Command = serde_json::from_str(line.trim_end()).unwrap();
        assert!(matches!(cmd, Command::Run { .. }));
    }
}
