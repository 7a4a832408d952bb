// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The normalized log entry: the uniform unit the whole pipeline traffics in.

use crate::command::CommandCategory;
use crate::id::MessageId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Free-form metadata bag attached to an entry.
///
/// Unknown keys pass through untouched; recognized keys are listed in
/// [`meta`]. Insertion order is preserved across serialization.
pub type Metadata = IndexMap<String, serde_json::Value>;

/// Recognized metadata keys.
///
/// Consumers decode these on read; writers are free to add keys beyond
/// this list.
pub mod meta {
    pub const TOOL_NAME: &str = "toolName";
    pub const TOOL_CALL_ID: &str = "toolCallId";
    pub const IS_RESULT: &str = "isResult";
    pub const SUBTYPE: &str = "subtype";
    pub const STREAMING: &str = "streaming";
    pub const TURN_COMPLETED: &str = "turnCompleted";
    pub const RESULT_SUBTYPE: &str = "resultSubtype";
    pub const DURATION: &str = "duration";
    pub const PENDING: &str = "pending";
    pub const DONE: &str = "done";
}

/// The kind of activity an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryType {
    UserMessage,
    AssistantMessage,
    ToolUse,
    SystemMessage,
    ErrorMessage,
    Thinking,
    Loading,
    TokenUsage,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::UserMessage => "user-message",
            EntryType::AssistantMessage => "assistant-message",
            EntryType::ToolUse => "tool-use",
            EntryType::SystemMessage => "system-message",
            EntryType::ErrorMessage => "error-message",
            EntryType::Thinking => "thinking",
            EntryType::Loading => "loading",
            EntryType::TokenUsage => "token-usage",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a completed command run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Classified action behind a `tool-use` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolAction {
    /// File read
    FileRead { path: String },
    /// File write or edit
    FileEdit { path: String },
    /// Shell command execution
    CommandRun {
        command: String,
        category: CommandCategory,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<CommandResult>,
    },
    /// Content search
    Search { query: String },
    /// URL fetch
    WebFetch { url: String },
    /// Any other named tool with raw arguments
    Tool {
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    /// Unclassifiable action
    Other { description: String },
}

impl fmt::Display for ToolAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolAction::FileRead { path } => write!(f, "read: {}", path),
            ToolAction::FileEdit { path } => write!(f, "edit: {}", path),
            ToolAction::CommandRun { command, .. } => write!(f, "run: {}", command),
            ToolAction::Search { query } => write!(f, "search: {}", query),
            ToolAction::WebFetch { url } => write!(f, "fetch: {}", url),
            ToolAction::Tool { name, .. } => write!(f, "tool: {}", name),
            ToolAction::Other { description } => write!(f, "{}", description),
        }
    }
}

/// One unit of normalized engine output.
///
/// `message_id` is assigned at persistence; entries that failed to persist
/// keep `None` and sort after persisted entries in merged views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// The user message that caused this agent reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    pub entry_type: EntryType,
    pub content: String,
    pub turn_index: u32,
    pub entry_index: u32,
    /// RFC 3339, from the engine when provided, else wall clock at persist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: Metadata,
    /// Present iff `entry_type == ToolUse`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_action: Option<ToolAction>,
}

impl NormalizedEntry {
    /// Create an entry with empty metadata and unassigned indexes.
    pub fn new(entry_type: EntryType, content: impl Into<String>) -> Self {
        Self {
            message_id: None,
            reply_to: None,
            entry_type,
            content: content.into(),
            turn_index: 0,
            entry_index: 0,
            timestamp: None,
            metadata: Metadata::new(),
            tool_action: None,
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_tool_action(mut self, action: ToolAction) -> Self {
        self.tool_action = Some(action);
        self
    }

    pub fn with_timestamp(mut self, ts: impl Into<String>) -> Self {
        self.timestamp = Some(ts.into());
        self
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Tool name, for `tool-use` entries that recorded one.
    pub fn tool_name(&self) -> Option<&str> {
        self.meta_str(meta::TOOL_NAME)
    }

    /// Engine-assigned tool call id linking a call to its result.
    pub fn tool_call_id(&self) -> Option<&str> {
        self.meta_str(meta::TOOL_CALL_ID)
    }

    /// Whether this entry is a tool result rather than a tool call.
    pub fn is_result(&self) -> bool {
        self.metadata
            .get(meta::IS_RESULT)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// System-message subtype, when recorded.
    pub fn subtype(&self) -> Option<&str> {
        self.meta_str(meta::SUBTYPE)
    }

    /// Fallback identity for deduplication when `message_id` is absent.
    pub fn dedupe_key(&self) -> (u32, Option<&str>, EntryType, &str) {
        (
            self.turn_index,
            self.timestamp.as_deref(),
            self.entry_type,
            self.content.as_str(),
        )
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
