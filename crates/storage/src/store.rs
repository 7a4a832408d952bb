// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The log store: public persistence API over WAL + materialized state.
//!
//! Writes append a [`StorageEvent`] to the WAL and fold it into the
//! in-memory state under one lock; reads serve from the state. Persist
//! failures are logged and reported as `None` — they never propagate into
//! the pipeline, which still delivers the live entry without a message id.

use crate::snapshot::{Snapshot, SnapshotError};
use crate::state::MaterializedState;
use crate::types::{
    LogRow, PendingRow, SessionRecord, StorageEvent, ToolRawBlob, ToolRow, TOOL_CONTENT_MAX,
};
use crate::wal::{Wal, WalError};
use chrono::{SecondsFormat, Utc};
use ov_core::{
    is_visible_for_mode, new_message_id, EntryType, ExecutionId, IssueId, MessageId,
    NormalizedEntry, SessionStatus,
};
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// `last_error` recorded by the startup sweep for dangling sessions.
const SERVER_RESTART_ERROR: &str = "server_restart";

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("bad cursor: {0}")]
    BadCursor(String),
}

/// Opaque pagination cursor encoding `(turn_index, entry_index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub turn_index: u32,
    pub entry_index: u32,
}

impl Cursor {
    /// Cursor pointing at a returned entry.
    pub fn for_entry(entry: &NormalizedEntry) -> Self {
        Self {
            turn_index: entry.turn_index,
            entry_index: entry.entry_index,
        }
    }

    fn key(&self) -> (u32, u32) {
        (self.turn_index, self.entry_index)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.turn_index, self.entry_index)
    }
}

impl FromStr for Cursor {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (turn, entry) = s
            .split_once(':')
            .ok_or_else(|| StoreError::BadCursor(s.to_string()))?;
        let turn_index = turn
            .parse()
            .map_err(|_| StoreError::BadCursor(s.to_string()))?;
        let entry_index = entry
            .parse()
            .map_err(|_| StoreError::BadCursor(s.to_string()))?;
        Ok(Self {
            turn_index,
            entry_index,
        })
    }
}

/// Read parameters for [`LogStore::logs_page`].
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Forward mode: rows strictly after this cursor.
    pub cursor: Option<Cursor>,
    /// Reverse mode: rows strictly before this cursor, newest page first.
    pub before: Option<Cursor>,
    /// Maximum rows considered at the first (type-level) stage.
    pub limit: usize,
}

struct Inner {
    wal: Wal,
    state: MaterializedState,
}

/// Durable store for issue logs, tool details, pending messages and
/// session records.
pub struct LogStore {
    inner: Mutex<Inner>,
    snapshot_path: std::path::PathBuf,
}

impl LogStore {
    /// Open the store in `dir`, recovering from snapshot + WAL replay.
    ///
    /// Any session left `pending`/`running` by a previous process is swept
    /// to `failed` with `last_error = "server_restart"` before the store is
    /// handed out.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let wal_path = dir.join("events.wal");
        let snapshot_path = dir.join("state.snapshot");

        let (mut state, snapshot_seq) = match Snapshot::load(&snapshot_path)? {
            Some(snapshot) => (snapshot.state, snapshot.seq),
            None => (MaterializedState::default(), 0),
        };

        let (mut wal, records) = Wal::open(&wal_path, snapshot_seq)?;
        let mut replayed = 0usize;
        for record in records {
            // Records at or before the snapshot seq are already folded in.
            if record.seq > snapshot_seq {
                state.apply(&record.event);
                replayed += 1;
            }
        }
        if replayed > 0 {
            tracing::debug!(replayed, "replayed WAL records on top of snapshot");
        }

        // Startup sweep: in-flight executions did not survive the restart.
        for issue_id in state.active_sessions() {
            warn!(issue_id = %issue_id, "sweeping dangling session to failed");
            let event = StorageEvent::SessionStatusChanged {
                issue_id,
                status: SessionStatus::Failed,
                error: Some(SERVER_RESTART_ERROR.to_string()),
            };
            wal.append(&event)?;
            state.apply(&event);
        }
        wal.sync()?;

        Ok(Self {
            inner: Mutex::new(Inner { wal, state }),
            snapshot_path,
        })
    }

    /// Append an event and fold it into the state.
    ///
    /// Syncs opportunistically on the WAL's group-commit policy.
    fn record(&self, event: StorageEvent) -> Result<(), WalError> {
        let mut inner = self.inner.lock();
        inner.wal.append(&event)?;
        inner.state.apply(&event);
        if inner.wal.needs_sync() {
            inner.wal.sync()?;
        }
        Ok(())
    }

    /// Persist one normalized entry for an issue.
    ///
    /// Returns a new entry carrying the assigned `message_id`, indexes and
    /// timestamp; the input is not mutated. On failure logs a warning and
    /// returns `None` — the caller still delivers the live event.
    pub fn persist_log_entry(
        &self,
        issue_id: &IssueId,
        execution_id: &ExecutionId,
        entry: &NormalizedEntry,
        turn_index: u32,
        entry_index: u32,
        reply_to: Option<MessageId>,
    ) -> Option<NormalizedEntry> {
        let id = new_message_id();
        let timestamp = entry
            .timestamp
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));

        let mut persisted = entry.clone();
        persisted.message_id = Some(id.clone());
        persisted.reply_to = reply_to.clone();
        persisted.turn_index = turn_index;
        persisted.entry_index = entry_index;
        persisted.timestamp = Some(timestamp.clone());
        persisted.content = entry.content.trim().to_string();

        let row = LogRow {
            id,
            issue_id: issue_id.clone(),
            execution_id: execution_id.clone(),
            turn_index,
            entry_index,
            entry_type: entry.entry_type,
            content: persisted.content.clone(),
            metadata: entry.metadata.clone(),
            reply_to,
            timestamp: Some(timestamp),
            visible: true,
        };

        match self.record(StorageEvent::LogInserted { row }) {
            Ok(()) => Some(persisted),
            Err(e) => {
                warn!(issue_id = %issue_id, error = %e, "failed to persist log entry");
                None
            }
        }
    }

    /// Persist the tool-detail row for a persisted `tool-use` entry.
    ///
    /// Returns the detail row id, or `None` for non-tool entries, entries
    /// without a `message_id`, and persist failures.
    pub fn persist_tool_detail(
        &self,
        issue_id: &IssueId,
        entry: &NormalizedEntry,
    ) -> Option<String> {
        if entry.entry_type != EntryType::ToolUse {
            return None;
        }
        let log_id = entry.message_id.clone()?;

        let mut content = entry.content.clone();
        if content.len() > TOOL_CONTENT_MAX {
            content.truncate(TOOL_CONTENT_MAX);
        }
        let kind = entry
            .tool_action
            .as_ref()
            .map(action_kind)
            .unwrap_or("other")
            .to_string();
        let blob = ToolRawBlob {
            tool_name: entry.tool_name().map(String::from),
            tool_call_id: entry.tool_call_id().map(String::from),
            tool_action: entry.tool_action.clone(),
            metadata: entry.metadata.clone(),
            content,
        };
        let raw = match serde_json::to_value(&blob) {
            Ok(v) => v,
            Err(e) => {
                warn!(issue_id = %issue_id, error = %e, "failed to serialize tool detail");
                return None;
            }
        };

        let row = ToolRow {
            id: uuid::Uuid::new_v4().to_string(),
            log_id,
            issue_id: issue_id.clone(),
            tool_name: entry.tool_name().map(String::from),
            tool_call_id: entry.tool_call_id().map(String::from),
            kind,
            is_result: entry.is_result(),
            raw,
        };
        let row_id = row.id.clone();

        match self.record(StorageEvent::ToolInserted { row }) {
            Ok(()) => Some(row_id),
            Err(e) => {
                warn!(issue_id = %issue_id, error = %e, "failed to persist tool detail");
                None
            }
        }
    }

    /// `max(turn_index) + 1`, or 0 for an issue with no persisted logs.
    pub fn next_turn_index(&self, issue_id: &IssueId) -> u32 {
        let inner = self.inner.lock();
        inner
            .state
            .max_turn_index(issue_id)
            .map(|t| t + 1)
            .unwrap_or(0)
    }

    /// Primary read path: one page of persisted logs, ascending.
    ///
    /// First stage mirrors the SQL conditions (visible rows; outside dev
    /// mode only user/assistant/system types) and applies the cursor bound
    /// and limit. Second stage joins tool details, reconstructs entries,
    /// and applies the subtype visibility rules in memory — callers that
    /// page a UI overfetch (`limit * 2 + 1`) to absorb it.
    pub fn logs_page(
        &self,
        issue_id: &IssueId,
        dev_mode: bool,
        query: &LogQuery,
    ) -> Vec<NormalizedEntry> {
        let inner = self.inner.lock();
        let rows = inner.state.logs_for(issue_id);

        let type_passes = |row: &LogRow| {
            row.visible
                && (dev_mode
                    || matches!(
                        row.entry_type,
                        EntryType::UserMessage
                            | EntryType::AssistantMessage
                            | EntryType::SystemMessage
                    ))
        };

        let selected: Vec<&LogRow> = if let Some(before) = &query.before {
            // Reverse page: newest rows strictly before the bound,
            // returned ascending.
            let mut page: Vec<&LogRow> = rows
                .iter()
                .rev()
                .filter(|row| type_passes(row))
                .filter(|row| (row.turn_index, row.entry_index) < before.key())
                .take(query.limit)
                .collect();
            page.reverse();
            page
        } else {
            let after = query.cursor.as_ref().map(Cursor::key);
            rows.iter()
                .filter(|row| type_passes(row))
                .filter(|row| match after {
                    Some(bound) => (row.turn_index, row.entry_index) > bound,
                    None => true,
                })
                .take(query.limit)
                .collect()
        };

        selected
            .into_iter()
            .map(|row| {
                let mut entry = row.to_entry();
                if let Some(tool) = inner.state.tool_for(&row.id) {
                    restore_from_tool_detail(&mut entry, tool);
                }
                entry
            })
            .filter(|entry| is_visible_for_mode(entry, dev_mode))
            .collect()
    }

    /// Newest persisted message id for an issue (live-tail merge bound).
    pub fn newest_message_id(&self, issue_id: &IssueId) -> Option<MessageId> {
        let inner = self.inner.lock();
        inner
            .state
            .logs_for(issue_id)
            .iter()
            .map(|row| row.id.clone())
            .max()
    }

    // ---- pending messages ----

    /// Queue a user message while no session is active.
    pub fn enqueue_pending(&self, issue_id: &IssueId, content: &str) -> Option<PendingRow> {
        let row = PendingRow {
            id: new_message_id(),
            issue_id: issue_id.clone(),
            content: content.to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            dispatched: false,
        };
        match self.record(StorageEvent::PendingEnqueued { row: row.clone() }) {
            Ok(()) => Some(row),
            Err(e) => {
                warn!(issue_id = %issue_id, error = %e, "failed to enqueue pending message");
                None
            }
        }
    }

    /// Undispatched pending messages, insertion order.
    pub fn pending_for(&self, issue_id: &IssueId) -> Vec<PendingRow> {
        self.inner.lock().state.pending_for(issue_id)
    }

    /// Mark pending messages dispatched — only after the engine call that
    /// consumed them returned successfully (or on restart, which drops
    /// them deliberately).
    pub fn mark_dispatched(&self, ids: &[MessageId]) {
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self.record(StorageEvent::PendingDispatched { ids: ids.to_vec() }) {
            warn!(error = %e, "failed to mark pending messages dispatched");
        }
    }

    // ---- session records ----

    pub fn session_record(&self, issue_id: &IssueId) -> Option<SessionRecord> {
        self.inner.lock().state.session(issue_id).cloned()
    }

    pub fn session_status(&self, issue_id: &IssueId) -> Option<SessionStatus> {
        self.inner
            .lock()
            .state
            .session(issue_id)
            .and_then(|record| record.status)
    }

    pub fn set_session_status(
        &self,
        issue_id: &IssueId,
        status: SessionStatus,
        error: Option<String>,
    ) {
        let event = StorageEvent::SessionStatusChanged {
            issue_id: issue_id.clone(),
            status,
            error,
        };
        if let Err(e) = self.record(event) {
            warn!(issue_id = %issue_id, error = %e, "failed to persist session status");
        }
    }

    pub fn external_session_id(&self, issue_id: &IssueId) -> Option<String> {
        self.inner
            .lock()
            .state
            .session(issue_id)
            .and_then(|record| record.external_session_id.clone())
    }

    pub fn set_external_session_id(&self, issue_id: &IssueId, external_session_id: &str) {
        let event = StorageEvent::ExternalSessionAssigned {
            issue_id: issue_id.clone(),
            external_session_id: external_session_id.to_string(),
        };
        if let Err(e) = self.record(event) {
            warn!(issue_id = %issue_id, error = %e, "failed to persist external session id");
        }
    }

    // ---- durability ----

    /// Force buffered WAL records to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        Ok(self.inner.lock().wal.sync()?)
    }

    /// Write a snapshot of the current state and reset the WAL.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.wal.sync()?;
        let seq = inner.wal.seq();
        let snapshot = Snapshot::new(seq, inner.state.clone());
        snapshot.save(&self.snapshot_path)?;
        // The snapshot is durable and covers everything up to seq.
        inner.wal.reset()?;
        Ok(())
    }
}

/// Tool-action tag stored in the `kind` column.
fn action_kind(action: &ov_core::ToolAction) -> &'static str {
    match action {
        ov_core::ToolAction::FileRead { .. } => "file_read",
        ov_core::ToolAction::FileEdit { .. } => "file_edit",
        ov_core::ToolAction::CommandRun { .. } => "command_run",
        ov_core::ToolAction::Search { .. } => "search",
        ov_core::ToolAction::WebFetch { .. } => "web_fetch",
        ov_core::ToolAction::Tool { .. } => "tool",
        ov_core::ToolAction::Other { .. } => "other",
    }
}

/// Rebuild `tool_action` (and empty content/metadata) from the raw blob.
fn restore_from_tool_detail(entry: &mut NormalizedEntry, tool: &ToolRow) {
    let blob: ToolRawBlob = match serde_json::from_value(tool.raw.clone()) {
        Ok(b) => b,
        Err(e) => {
            warn!(log_id = %tool.log_id, error = %e, "unreadable tool detail blob");
            return;
        }
    };
    entry.tool_action = blob.tool_action;
    if entry.content.is_empty() {
        entry.content = blob.content;
    }
    if entry.metadata.is_empty() {
        entry.metadata = blob.metadata;
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
