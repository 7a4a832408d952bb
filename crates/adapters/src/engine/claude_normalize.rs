// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Normalizer for the streaming-JSON engine.
//!
//! One raw stdout line in, zero or more [`NormalizedEntry`] out. Total:
//! non-JSON input becomes a `system-message` carrying the raw line, blank
//! input returns nothing, and nothing panics.
//!
//! The normalizer holds the execution's filter rules: a suppressed tool
//! call records its id so the matching result is suppressed too. This runs
//! before ring-buffer insertion and persistence.

use super::LogNormalizer;
use ov_core::{
    classify_command, meta, result_summary_line, EntryType, NormalizedEntry, ToolAction,
    WriteFilterRule,
};
use serde_json::Value;
use std::collections::HashSet;

/// Error summaries are capped at this many characters.
const ERROR_SUMMARY_MAX: usize = 300;

/// Known crash signatures mapped to a stable kind and recovery hint.
const ERROR_SIGNATURES: &[(&str, &str, &str)] = &[
    (
        "rust-analyzer",
        "lsp_crash",
        "restart the editor's rust-analyzer server before retrying",
    ),
    (
        "command not found",
        "missing_binary",
        "install the missing binary or fix PATH",
    ),
];

/// Stateful normalizer for Claude-style streaming JSON.
pub struct ClaudeNormalizer {
    rules: Vec<WriteFilterRule>,
    filtered_ids: HashSet<String>,
}

impl ClaudeNormalizer {
    pub fn new(rules: Vec<WriteFilterRule>) -> Self {
        Self {
            rules,
            filtered_ids: HashSet::new(),
        }
    }

    fn tool_is_filtered(&self, name: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches_tool(name))
    }
}

impl LogNormalizer for ClaudeNormalizer {
    fn parse(&mut self, line: &str) -> Vec<NormalizedEntry> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                return vec![NormalizedEntry::new(EntryType::SystemMessage, trimmed)];
            }
        };

        let timestamp = value.get("timestamp").and_then(Value::as_str);
        let mut entries = match value.get("type").and_then(Value::as_str) {
            Some("assistant") => self.parse_assistant(&value),
            Some("user") => self.parse_user(&value),
            Some("content_block_delta") => parse_delta(&value),
            Some("tool_use") => self.parse_tool_use_block(&value),
            Some("tool_result") => self.parse_tool_result_block(&value),
            Some("system") => parse_system(&value),
            Some("result") => parse_result(&value),
            Some("error") => vec![parse_error(&value)],
            _ => vec![NormalizedEntry::new(EntryType::SystemMessage, trimmed)],
        };

        if let Some(ts) = timestamp {
            for entry in &mut entries {
                if entry.timestamp.is_none() {
                    entry.timestamp = Some(ts.to_string());
                }
            }
        }
        entries
    }
}

impl ClaudeNormalizer {
    /// `assistant` line: joined text blocks, then one tool-use per
    /// `tool_use` block (subject to filter rules).
    fn parse_assistant(&mut self, value: &Value) -> Vec<NormalizedEntry> {
        let Some(content) = value
            .pointer("/message/content")
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        let mut entries = Vec::new();

        let text: Vec<&str> = content
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect();
        if !text.is_empty() {
            entries.push(NormalizedEntry::new(
                EntryType::AssistantMessage,
                text.join(""),
            ));
        }

        let thinking: Vec<&str> = content
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("thinking"))
            .filter_map(|block| block.get("thinking").and_then(Value::as_str))
            .collect();
        if !thinking.is_empty() {
            entries.push(NormalizedEntry::new(EntryType::Thinking, thinking.join("")));
        }

        for block in content {
            if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                if let Some(entry) = self.tool_use_entry(block) {
                    entries.push(entry);
                }
            }
        }

        entries
    }

    /// One `tool_use` block → tool-use entry, unless a rule filters it.
    fn tool_use_entry(&mut self, block: &Value) -> Option<NormalizedEntry> {
        let name = block.get("name").and_then(Value::as_str)?;
        let call_id = block.get("id").and_then(Value::as_str);
        let input = block.get("input").cloned().unwrap_or(Value::Null);

        if self.tool_is_filtered(name) {
            if let Some(id) = call_id {
                self.filtered_ids.insert(id.to_string());
            }
            return None;
        }

        let action = classify_tool(name, &input);
        let mut entry = NormalizedEntry::new(EntryType::ToolUse, action.to_string())
            .with_meta(meta::TOOL_NAME, name);
        if let Some(id) = call_id {
            entry = entry.with_meta(meta::TOOL_CALL_ID, id);
        }
        Some(entry.with_tool_action(action))
    }

    fn parse_tool_use_block(&mut self, value: &Value) -> Vec<NormalizedEntry> {
        self.tool_use_entry(value).into_iter().collect()
    }

    /// `user` line: tool results, or command output wrapped in
    /// `<local-command-stdout>` markers.
    fn parse_user(&mut self, value: &Value) -> Vec<NormalizedEntry> {
        let Some(message) = value.get("message") else {
            return Vec::new();
        };

        match message.get("content") {
            Some(Value::Array(blocks)) => blocks
                .iter()
                .filter(|block| {
                    block.get("type").and_then(Value::as_str) == Some("tool_result")
                })
                .filter_map(|block| self.tool_result_entry(block))
                .collect(),
            Some(Value::String(text)) => command_output_entry(text).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    fn parse_tool_result_block(&mut self, value: &Value) -> Vec<NormalizedEntry> {
        self.tool_result_entry(value).into_iter().collect()
    }

    /// One `tool_result` block → tool-use (isResult) or error-message.
    fn tool_result_entry(&mut self, block: &Value) -> Option<NormalizedEntry> {
        let call_id = block.get("tool_use_id").and_then(Value::as_str);

        // A filtered call suppresses its result exactly once.
        if let Some(id) = call_id {
            if self.filtered_ids.remove(id) {
                return None;
            }
        }

        let content = result_content(block);
        let is_error = block
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let entry_type = if is_error {
            EntryType::ErrorMessage
        } else {
            EntryType::ToolUse
        };
        let mut entry =
            NormalizedEntry::new(entry_type, content).with_meta(meta::IS_RESULT, true);
        if let Some(id) = call_id {
            entry = entry.with_meta(meta::TOOL_CALL_ID, id);
        }
        Some(entry)
    }
}

/// `content_block_delta` line → streaming assistant/thinking chunk.
fn parse_delta(value: &Value) -> Vec<NormalizedEntry> {
    let Some(delta) = value.get("delta") else {
        return Vec::new();
    };
    match delta.get("type").and_then(Value::as_str) {
        Some("text_delta") => delta
            .get("text")
            .and_then(Value::as_str)
            .map(|text| {
                vec![NormalizedEntry::new(EntryType::AssistantMessage, text)
                    .with_meta(meta::STREAMING, true)]
            })
            .unwrap_or_default(),
        Some("thinking_delta") => delta
            .get("thinking")
            .and_then(Value::as_str)
            .map(|text| {
                vec![NormalizedEntry::new(EntryType::Thinking, text)
                    .with_meta(meta::STREAMING, true)]
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// `system` line: init, compact boundary, hook response.
fn parse_system(value: &Value) -> Vec<NormalizedEntry> {
    let subtype = value.get("subtype").and_then(Value::as_str).unwrap_or("");
    let entry = match subtype {
        "init" => {
            let cwd = value.get("cwd").and_then(Value::as_str).unwrap_or("");
            let content = if cwd.is_empty() {
                "session started".to_string()
            } else {
                format!("session started in {cwd}")
            };
            NormalizedEntry::new(EntryType::SystemMessage, content)
                .with_meta(meta::SUBTYPE, "init")
        }
        "compact_boundary" => {
            NormalizedEntry::new(EntryType::SystemMessage, "conversation compacted")
                .with_meta(meta::SUBTYPE, "compact_boundary")
        }
        "hook_response" => {
            let output = value.get("output").and_then(Value::as_str).unwrap_or("");
            NormalizedEntry::new(EntryType::SystemMessage, output)
                .with_meta(meta::SUBTYPE, "hook_response")
        }
        other => NormalizedEntry::new(EntryType::SystemMessage, value.to_string())
            .with_meta(meta::SUBTYPE, other),
    };
    vec![entry]
}

/// `result` line: success summary or normalized error.
fn parse_result(value: &Value) -> Vec<NormalizedEntry> {
    let subtype = value.get("subtype").and_then(Value::as_str).unwrap_or("");
    let is_error = value
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let duration_ms = value.get("duration_ms").and_then(Value::as_u64);
    let input_tokens = value.pointer("/usage/input_tokens").and_then(Value::as_u64);
    let output_tokens = value
        .pointer("/usage/output_tokens")
        .and_then(Value::as_u64);
    let cost = value.get("total_cost_usd").and_then(Value::as_f64);
    let summary = result_summary_line(duration_ms, input_tokens, output_tokens, cost);

    if subtype == "success" && !is_error {
        let mut entry = NormalizedEntry::new(EntryType::SystemMessage, summary)
            .with_meta(meta::SUBTYPE, "result")
            .with_meta(meta::RESULT_SUBTYPE, subtype)
            .with_meta(meta::TURN_COMPLETED, true);
        if let Some(ms) = duration_ms {
            entry = entry.with_meta(meta::DURATION, ms);
        }
        return vec![entry];
    }

    // Any other subtype (or is_error) is a failure. Normalize the first
    // reported error to a stable {kind, summary}.
    let raw_error = value
        .pointer("/errors/0")
        .map(error_text)
        .or_else(|| {
            value
                .get("result")
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| subtype.to_string());
    let (kind, normalized) = normalize_error(&raw_error);

    let mut entry = NormalizedEntry::new(EntryType::ErrorMessage, normalized)
        .with_meta(meta::SUBTYPE, "result")
        .with_meta(meta::RESULT_SUBTYPE, subtype)
        .with_meta(meta::TURN_COMPLETED, true)
        .with_meta("errorKind", kind);
    if let Some(ms) = duration_ms {
        entry = entry.with_meta(meta::DURATION, ms);
    }
    vec![entry]
}

/// `error` line → error-message.
fn parse_error(value: &Value) -> NormalizedEntry {
    let text = value
        .pointer("/error/message")
        .or_else(|| value.get("message"))
        .or_else(|| value.get("error"))
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| value.to_string());
    let (kind, summary) = normalize_error(&text);
    NormalizedEntry::new(EntryType::ErrorMessage, summary).with_meta("errorKind", kind)
}

/// Errors arrive as strings or `{message}` objects.
fn error_text(value: &Value) -> String {
    value
        .get("message")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}

/// Map raw error text to `(kind, summary)`, capped at 300 chars, with a
/// recovery hint for known crash signatures.
fn normalize_error(raw: &str) -> (&'static str, String) {
    let mut summary: String = raw.chars().take(ERROR_SUMMARY_MAX).collect();
    for (signature, kind, hint) in ERROR_SIGNATURES {
        if raw.contains(signature) {
            summary = format!("{summary} ({hint})");
            return (kind, summary);
        }
    }
    ("error", summary)
}

/// Strip `<local-command-stdout>` markers into a command-output message.
fn command_output_entry(text: &str) -> Option<NormalizedEntry> {
    let inner = text
        .trim()
        .strip_prefix("<local-command-stdout>")?
        .strip_suffix("</local-command-stdout>")?;
    Some(
        NormalizedEntry::new(EntryType::SystemMessage, inner.trim())
            .with_meta(meta::SUBTYPE, "command_output"),
    )
}

/// `tool_result` content: plain string or joined text blocks.
fn result_content(block: &Value) -> String {
    match block.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Classify `(toolName, input)` into a [`ToolAction`].
pub(crate) fn classify_tool(name: &str, input: &Value) -> ToolAction {
    let str_field = |key: &str| input.get(key).and_then(Value::as_str).map(String::from);

    match name {
        "Read" => match str_field("file_path") {
            Some(path) => ToolAction::FileRead { path },
            None => ToolAction::Other {
                description: name.to_string(),
            },
        },
        "Write" | "Edit" | "MultiEdit" => match str_field("file_path") {
            Some(path) => ToolAction::FileEdit { path },
            None => ToolAction::Other {
                description: name.to_string(),
            },
        },
        "NotebookEdit" => match str_field("notebook_path") {
            Some(path) => ToolAction::FileEdit { path },
            None => ToolAction::Other {
                description: name.to_string(),
            },
        },
        "Bash" => {
            let command = str_field("command").unwrap_or_default();
            let category = classify_command(&command);
            ToolAction::CommandRun {
                command,
                category,
                result: None,
            }
        }
        "Grep" | "Glob" => match str_field("pattern") {
            Some(query) => ToolAction::Search { query },
            None => ToolAction::Other {
                description: name.to_string(),
            },
        },
        "WebSearch" => match str_field("query") {
            Some(query) => ToolAction::Search { query },
            None => ToolAction::Other {
                description: name.to_string(),
            },
        },
        "WebFetch" => match str_field("url") {
            Some(url) => ToolAction::WebFetch { url },
            None => ToolAction::Other {
                description: name.to_string(),
            },
        },
        _ => ToolAction::Tool {
            name: name.to_string(),
            args: input.clone(),
        },
    }
}

#[cfg(test)]
#[path = "claude_normalize_tests.rs"]
mod tests;
