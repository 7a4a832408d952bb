// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Diagnostic dump of protocol I/O, gated behind `LOG_EXECUTOR_IO`.
//!
//! Result-style lines are sanitized to a whitelist of summary fields
//! before logging so transcript content never lands in the server log.

use ov_core::EngineKind;

/// Logged lines are truncated to this many characters.
const MAX_LOGGED_LINE: usize = 1200;

/// Summary fields kept when sanitizing a result line.
const RESULT_WHITELIST: &[&str] = &[
    "type",
    "subtype",
    "is_error",
    "duration_ms",
    "total_cost_usd",
    "usage",
    "method",
];

pub(crate) fn log_inbound(engine: EngineKind, line: &str) {
    if !crate::env::executor_io_logging() {
        return;
    }
    let rendered = render(line);
    tracing::debug!(target: "executor_io", engine = %engine, dir = "in", line = %rendered);
}

pub(crate) fn log_outbound(engine: EngineKind, line: &str) {
    if !crate::env::executor_io_logging() {
        return;
    }
    let rendered = render(line);
    tracing::debug!(target: "executor_io", engine = %engine, dir = "out", line = %rendered);
}

fn render(line: &str) -> String {
    let sanitized = sanitize_result(line).unwrap_or_else(|| line.to_string());
    truncate(&sanitized)
}

/// Reduce a `result`/`turn completed` line to its whitelisted fields.
fn sanitize_result(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let obj = value.as_object()?;

    let is_result = obj.get("type").and_then(|v| v.as_str()) == Some("result")
        || obj
            .get("method")
            .and_then(|v| v.as_str())
            .is_some_and(|m| m.ends_with("/completed"));
    if !is_result {
        return None;
    }

    let mut kept = serde_json::Map::new();
    for key in RESULT_WHITELIST {
        if let Some(v) = obj.get(*key) {
            kept.insert((*key).to_string(), v.clone());
        }
    }
    Some(serde_json::Value::Object(kept).to_string())
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_LOGGED_LINE {
        return s.to_string();
    }
    let mut end = MAX_LOGGED_LINE;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

#[cfg(test)]
#[path = "iolog_tests.rs"]
mod tests;
