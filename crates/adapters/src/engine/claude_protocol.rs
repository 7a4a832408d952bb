// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming-JSON protocol handler (handshake-free).
//!
//! Owns the child's stdin and stdout. Stdout is wrapped line-by-line:
//! control requests are intercepted and auto-responded on stdin, never
//! forwarded downstream; everything else flows to the reader loop.

use super::{EngineError, KillSwitch, LineWriter, ProcessControl, SharedSlashCommands};
use async_trait::async_trait;
use ov_core::EngineKind;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

/// Control surface over a streaming-JSON child.
pub(crate) struct ClaudeControl {
    writer: LineWriter,
    kill: KillSwitch,
    running: Arc<AtomicBool>,
}

impl ClaudeControl {
    pub(crate) fn new(writer: LineWriter, kill: KillSwitch, running: Arc<AtomicBool>) -> Self {
        Self {
            writer,
            kill,
            running,
        }
    }
}

#[async_trait]
impl ProcessControl for ClaudeControl {
    async fn send_user_message(&self, text: &str) -> Result<(), EngineError> {
        let frame = json!({
            "type": "user",
            "message": { "role": "user", "content": text },
        })
        .to_string();
        crate::iolog::log_outbound(EngineKind::Claude, &frame);
        self.writer.write_line(&frame).await
    }

    async fn interrupt(&self) -> Result<(), EngineError> {
        let frame = json!({
            "type": "control_request",
            "request_id": uuid::Uuid::new_v4().to_string(),
            "request": { "subtype": "interrupt" },
        })
        .to_string();
        crate::iolog::log_outbound(EngineKind::Claude, &frame);
        self.writer.write_line(&frame).await
    }

    async fn close(&self) {
        self.writer.close().await;
    }

    async fn kill(&self) {
        self.kill.kill().await;
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Wrap the child's stdout: intercept control requests, capture init
/// capabilities, forward the rest as a filtered line stream.
pub(crate) fn wrap_stdout(
    stdout: tokio::process::ChildStdout,
    writer: LineWriter,
    slash_commands: SharedSlashCommands,
) -> mpsc::Receiver<String> {
    let (lines_tx, lines_rx) = mpsc::channel(256);

    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            crate::iolog::log_inbound(EngineKind::Claude, &line);

            if let Some(response) = control_response_for(&line) {
                crate::iolog::log_outbound(EngineKind::Claude, &response);
                // Best effort: a closed stdin drops the response.
                if let Err(e) = writer.write_line(&response).await {
                    tracing::debug!(error = %e, "dropped control response");
                }
                continue;
            }

            if let Some(commands) = extract_slash_commands(&line) {
                slash_commands.set(commands);
            }

            if lines_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    lines_rx
}

/// If `line` is a control request, build the auto-approval response.
///
/// A line is a control request iff it parses as JSON with
/// `type == "control_request"`, a non-empty `request_id`, and a `request`
/// object. Everything else returns `None` and flows downstream.
pub fn control_response_for(line: &str) -> Option<String> {
    let value: Value = serde_json::from_str(line).ok()?;
    if value.get("type").and_then(Value::as_str) != Some("control_request") {
        return None;
    }
    let request_id = value.get("request_id").and_then(Value::as_str)?;
    if request_id.is_empty() {
        return None;
    }
    let request = value.get("request")?.as_object()?;

    let response = match request.get("subtype").and_then(Value::as_str) {
        Some("can_use_tool") => {
            let updated_input = request.get("input").cloned().unwrap_or_else(|| json!({}));
            json!({
                "type": "control_response",
                "response": {
                    "subtype": "success",
                    "request_id": request_id,
                    "response": {
                        "behavior": "allow",
                        "updatedInput": updated_input,
                    },
                },
            })
        }
        Some("hook_callback") => json!({
            "type": "control_response",
            "response": {
                "subtype": "success",
                "request_id": request_id,
                "response": {
                    "hookSpecificOutput": {
                        "hookEventName": "PreToolUse",
                        "permissionDecision": "allow",
                    },
                },
            },
        }),
        other => {
            let subtype = other.unwrap_or("<missing>");
            tracing::warn!(subtype, "unknown control request subtype, refusing");
            json!({
                "type": "control_response",
                "response": {
                    "subtype": "error",
                    "request_id": request_id,
                    "error": format!("unsupported control request subtype: {subtype}"),
                },
            })
        }
    };

    Some(response.to_string())
}

/// Slash commands advertised by the `system`/`init` line.
fn extract_slash_commands(line: &str) -> Option<Vec<String>> {
    let value: Value = serde_json::from_str(line).ok()?;
    if value.get("type").and_then(Value::as_str) != Some("system")
        || value.get("subtype").and_then(Value::as_str) != Some("init")
    {
        return None;
    }
    let commands = value.get("slash_commands")?.as_array()?;
    Some(
        commands
            .iter()
            .filter_map(|c| c.as_str().map(String::from))
            .collect(),
    )
}

#[cfg(test)]
#[path = "claude_protocol_tests.rs"]
mod tests;
