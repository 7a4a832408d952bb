// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage record types and the WAL event alphabet.

use ov_core::{
    EntryType, ExecutionId, IssueId, MessageId, Metadata, NormalizedEntry, SessionStatus,
    ToolAction,
};
use serde::{Deserialize, Serialize};

/// Tool-detail content is truncated to this many characters before storage.
pub const TOOL_CONTENT_MAX: usize = 5_000;

/// One row of the `issue_logs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRow {
    pub id: MessageId,
    pub issue_id: IssueId,
    pub execution_id: ExecutionId,
    pub turn_index: u32,
    pub entry_index: u32,
    pub entry_type: EntryType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub visible: bool,
}

impl LogRow {
    /// Reconstruct the pipeline entry this row was persisted from.
    pub fn to_entry(&self) -> NormalizedEntry {
        NormalizedEntry {
            message_id: Some(self.id.clone()),
            reply_to: self.reply_to.clone(),
            entry_type: self.entry_type,
            content: self.content.clone(),
            turn_index: self.turn_index,
            entry_index: self.entry_index,
            timestamp: self.timestamp.clone(),
            metadata: self.metadata.clone(),
            tool_action: None,
        }
    }
}

/// One row of the `issue_logs_tools` table: a compact blob preserving the
/// tool call even when the base row's content/metadata is trimmed away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRow {
    pub id: String,
    pub log_id: MessageId,
    pub issue_id: IssueId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool-action kind tag (`file_read`, `command_run`, …).
    pub kind: String,
    pub is_result: bool,
    pub raw: serde_json::Value,
}

/// Serialized shape of [`ToolRow::raw`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRawBlob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_action: Option<ToolAction>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    pub content: String,
}

/// One row of the `pending_messages` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRow {
    pub id: MessageId,
    pub issue_id: IssueId,
    pub content: String,
    pub created_at: String,
    pub dispatched: bool,
}

/// Per-issue session bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_session_id: Option<String>,
}

/// The WAL event alphabet.
///
/// Serializes with `{"type": "log:inserted", ...}` format; replay applies
/// these to [`crate::MaterializedState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageEvent {
    #[serde(rename = "log:inserted")]
    LogInserted { row: LogRow },

    #[serde(rename = "tool:inserted")]
    ToolInserted { row: ToolRow },

    #[serde(rename = "pending:enqueued")]
    PendingEnqueued { row: PendingRow },

    #[serde(rename = "pending:dispatched")]
    PendingDispatched { ids: Vec<MessageId> },

    #[serde(rename = "session:status")]
    SessionStatusChanged {
        issue_id: IssueId,
        status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "session:external_id")]
    ExternalSessionAssigned {
        issue_id: IssueId,
        external_session_id: String,
    },
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
