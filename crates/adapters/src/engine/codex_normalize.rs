// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Normalizer for the JSON-RPC engine's notification stream.
//!
//! Dispatches on the `method` field of JSONL notifications. RPC responses
//! never reach this normalizer (the transport routes them to waiters), but
//! parsing stays total regardless of what arrives.

use super::LogNormalizer;
use ov_core::{
    classify_command, meta, turn_usage_line, CommandResult, EntryType, NormalizedEntry,
    ToolAction, WriteFilterRule,
};
use serde_json::Value;
use std::collections::HashSet;

/// Stateful normalizer for Codex app-server notifications.
pub struct CodexNormalizer {
    rules: Vec<WriteFilterRule>,
    filtered_ids: HashSet<String>,
}

impl CodexNormalizer {
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

impl LogNormalizer for CodexNormalizer {
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

        let params = value.get("params").cloned().unwrap_or(Value::Null);
        match value.get("method").and_then(Value::as_str) {
            Some("item/agentMessage/delta") => parse_message_delta(&params),
            Some("item/started") => self.parse_item(&params, ItemPhase::Started),
            Some("item/completed") => self.parse_item(&params, ItemPhase::Completed),
            Some("turn/started") => vec![NormalizedEntry::new(
                EntryType::SystemMessage,
                "turn started",
            )
            .with_meta(meta::SUBTYPE, "turn_started")],
            Some("turn/completed") => parse_turn_completed(&params),
            Some("thread/started") => parse_thread_started(&params),
            Some("thread/status/changed") => parse_thread_status(&params),
            Some("error") => vec![parse_error(&params)],
            _ => vec![NormalizedEntry::new(EntryType::SystemMessage, trimmed)],
        }
    }
}

enum ItemPhase {
    Started,
    Completed,
}

impl CodexNormalizer {
    /// `item/started` and `item/completed`: dispatch on `item.type`.
    fn parse_item(&mut self, params: &Value, phase: ItemPhase) -> Vec<NormalizedEntry> {
        let Some(item) = params.get("item") else {
            return Vec::new();
        };
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or("");
        let item_id = item.get("id").and_then(Value::as_str);

        // Reasoning items are engine-internal chatter.
        if item_type == "reasoning" {
            return Vec::new();
        }

        if self.tool_is_filtered(item_type) {
            match phase {
                ItemPhase::Started => {
                    if let Some(id) = item_id {
                        self.filtered_ids.insert(id.to_string());
                    }
                    return Vec::new();
                }
                ItemPhase::Completed => {
                    if let Some(id) = item_id {
                        if self.filtered_ids.remove(id) {
                            return Vec::new();
                        }
                    }
                }
            }
        } else if let (ItemPhase::Completed, Some(id)) = (&phase, item_id) {
            // A rule disabled mid-stream still suppresses the pending result.
            if self.filtered_ids.remove(id) {
                return Vec::new();
            }
        }

        match item_type {
            "agentMessage" => agent_message_entry(item, &phase).into_iter().collect(),
            "commandExecution" => command_entry(item, item_id, &phase).into_iter().collect(),
            "fileChange" => file_change_entry(item, item_id, &phase).into_iter().collect(),
            _ => Vec::new(),
        }
    }
}

/// Streaming assistant text chunk.
fn parse_message_delta(params: &Value) -> Vec<NormalizedEntry> {
    let Some(delta) = params.get("delta").and_then(Value::as_str) else {
        return Vec::new();
    };
    vec![NormalizedEntry::new(EntryType::AssistantMessage, delta)
        .with_meta(meta::STREAMING, true)]
}

fn agent_message_entry(item: &Value, phase: &ItemPhase) -> Option<NormalizedEntry> {
    let text = item.get("text").and_then(Value::as_str).unwrap_or("");
    let entry = NormalizedEntry::new(EntryType::AssistantMessage, text);
    Some(match phase {
        ItemPhase::Started => entry.with_meta(meta::STREAMING, true),
        ItemPhase::Completed => entry.with_meta(meta::IS_RESULT, true),
    })
}

fn command_entry(
    item: &Value,
    item_id: Option<&str>,
    phase: &ItemPhase,
) -> Option<NormalizedEntry> {
    let command = item
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let category = classify_command(&command);

    let (action, content, streaming) = match phase {
        ItemPhase::Started => (
            ToolAction::CommandRun {
                command: command.clone(),
                category,
                result: None,
            },
            command.clone(),
            true,
        ),
        ItemPhase::Completed => {
            let output = item
                .get("aggregatedOutput")
                .or_else(|| item.get("output"))
                .and_then(Value::as_str)
                .map(String::from);
            let exit_code = item
                .get("exitCode")
                .and_then(Value::as_i64)
                .map(|c| c as i32);
            (
                ToolAction::CommandRun {
                    command: command.clone(),
                    category,
                    result: Some(CommandResult {
                        output: output.clone(),
                        exit_code,
                    }),
                },
                output.unwrap_or(command.clone()),
                false,
            )
        }
    };

    let mut entry = NormalizedEntry::new(EntryType::ToolUse, content)
        .with_meta(meta::TOOL_NAME, "commandExecution");
    if let Some(id) = item_id {
        entry = entry.with_meta(meta::TOOL_CALL_ID, id);
    }
    if streaming {
        entry = entry.with_meta(meta::STREAMING, true);
    } else {
        entry = entry.with_meta(meta::IS_RESULT, true);
        if let Some(ms) = item.get("durationMs").and_then(Value::as_u64) {
            entry = entry.with_meta(meta::DURATION, ms);
        }
    }
    Some(entry.with_tool_action(action))
}

fn file_change_entry(
    item: &Value,
    item_id: Option<&str>,
    phase: &ItemPhase,
) -> Option<NormalizedEntry> {
    let path = item
        .get("path")
        .and_then(Value::as_str)
        .or_else(|| item.pointer("/changes/0/path").and_then(Value::as_str))
        .unwrap_or("")
        .to_string();

    let mut entry = NormalizedEntry::new(EntryType::ToolUse, format!("edit: {path}"))
        .with_meta(meta::TOOL_NAME, "fileChange")
        .with_tool_action(ToolAction::FileEdit { path });
    if let Some(id) = item_id {
        entry = entry.with_meta(meta::TOOL_CALL_ID, id);
    }
    entry = match phase {
        ItemPhase::Started => entry.with_meta(meta::STREAMING, true),
        ItemPhase::Completed => entry.with_meta(meta::IS_RESULT, true),
    };
    Some(entry)
}

/// `turn/completed`: usage summary with `turnCompleted` marker.
fn parse_turn_completed(params: &Value) -> Vec<NormalizedEntry> {
    let input = params
        .pointer("/turn/usage/inputTokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let output = params
        .pointer("/turn/usage/outputTokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    vec![NormalizedEntry::new(
        EntryType::SystemMessage,
        turn_usage_line(input, output),
    )
    .with_meta(meta::TURN_COMPLETED, true)]
}

fn parse_thread_started(params: &Value) -> Vec<NormalizedEntry> {
    let thread_id = params
        .pointer("/thread/id")
        .or_else(|| params.get("threadId"))
        .and_then(Value::as_str)
        .unwrap_or("");
    vec![NormalizedEntry::new(
        EntryType::SystemMessage,
        format!("thread started: {thread_id}"),
    )
    .with_meta(meta::SUBTYPE, "thread_started")]
}

fn parse_thread_status(params: &Value) -> Vec<NormalizedEntry> {
    let status = params.get("status").and_then(Value::as_str).unwrap_or("");
    let message = params
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(status);

    let entry = if status == "systemError" {
        NormalizedEntry::new(EntryType::ErrorMessage, message)
    } else {
        NormalizedEntry::new(EntryType::SystemMessage, format!("thread status: {status}"))
            .with_meta(meta::SUBTYPE, "thread_status")
    };
    vec![entry]
}

/// `error` notification: message + retry metadata.
fn parse_error(params: &Value) -> NormalizedEntry {
    let message = params
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown engine error");
    let mut entry = NormalizedEntry::new(EntryType::ErrorMessage, message);
    if let Some(code) = params.get("code").and_then(Value::as_i64) {
        entry = entry.with_meta("code", code);
    }
    if let Some(will_retry) = params.get("willRetry").and_then(Value::as_bool) {
        entry = entry.with_meta("willRetry", will_retry);
    }
    entry
}

#[cfg(test)]
#[path = "codex_normalize_tests.rs"]
mod tests;
