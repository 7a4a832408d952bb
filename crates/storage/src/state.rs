// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay.
//!
//! Pure data: `apply` folds one [`StorageEvent`] into the in-memory
//! "tables". The store wraps this behind a lock; replay at open rebuilds
//! it from the last snapshot plus the WAL suffix.

use crate::types::{LogRow, PendingRow, SessionRecord, StorageEvent, ToolRow};
use ov_core::{IssueId, MessageId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The replayed view of all storage tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterializedState {
    /// issue_logs: rows per issue, sorted by `(turn_index, entry_index)`.
    logs: HashMap<IssueId, Vec<LogRow>>,
    /// issue_logs_tools: detail row per tool-use log id.
    tools: HashMap<MessageId, ToolRow>,
    /// pending_messages: rows per issue, insertion order.
    pending: HashMap<IssueId, Vec<PendingRow>>,
    /// per-issue session bookkeeping.
    sessions: HashMap<IssueId, SessionRecord>,
}

impl MaterializedState {
    /// Fold one event into the state.
    pub fn apply(&mut self, event: &StorageEvent) {
        match event {
            StorageEvent::LogInserted { row } => {
                let rows = self.logs.entry(row.issue_id.clone()).or_default();
                let key = (row.turn_index, row.entry_index);
                // Appends arrive in order under the per-issue lock; replay
                // of rotated WALs may interleave, so keep the sort honest.
                match rows.last() {
                    Some(last) if (last.turn_index, last.entry_index) < key => {
                        rows.push(row.clone())
                    }
                    None => rows.push(row.clone()),
                    Some(_) => {
                        let at = rows
                            .partition_point(|r| (r.turn_index, r.entry_index) < key);
                        rows.insert(at, row.clone());
                    }
                }
            }
            StorageEvent::ToolInserted { row } => {
                self.tools.insert(row.log_id.clone(), row.clone());
            }
            StorageEvent::PendingEnqueued { row } => {
                self.pending
                    .entry(row.issue_id.clone())
                    .or_default()
                    .push(row.clone());
            }
            StorageEvent::PendingDispatched { ids } => {
                for rows in self.pending.values_mut() {
                    for row in rows.iter_mut() {
                        if ids.contains(&row.id) {
                            row.dispatched = true;
                        }
                    }
                }
            }
            StorageEvent::SessionStatusChanged {
                issue_id,
                status,
                error,
            } => {
                let record = self.sessions.entry(issue_id.clone()).or_default();
                record.status = Some(*status);
                if error.is_some() {
                    record.last_error = error.clone();
                }
            }
            StorageEvent::ExternalSessionAssigned {
                issue_id,
                external_session_id,
            } => {
                let record = self.sessions.entry(issue_id.clone()).or_default();
                record.external_session_id = Some(external_session_id.clone());
            }
        }
    }

    /// Log rows for an issue, sorted ascending by `(turn, entry)`.
    pub fn logs_for(&self, issue_id: &IssueId) -> &[LogRow] {
        self.logs.get(issue_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Highest persisted turn index for an issue.
    pub fn max_turn_index(&self, issue_id: &IssueId) -> Option<u32> {
        self.logs_for(issue_id).last().map(|row| row.turn_index)
    }

    /// Tool-detail row for a log id.
    pub fn tool_for(&self, log_id: &MessageId) -> Option<&ToolRow> {
        self.tools.get(log_id)
    }

    /// Undispatched pending messages for an issue, insertion order.
    pub fn pending_for(&self, issue_id: &IssueId) -> Vec<PendingRow> {
        self.pending
            .get(issue_id)
            .map(|rows| rows.iter().filter(|r| !r.dispatched).cloned().collect())
            .unwrap_or_default()
    }

    /// Session record for an issue.
    pub fn session(&self, issue_id: &IssueId) -> Option<&SessionRecord> {
        self.sessions.get(issue_id)
    }

    /// Issues whose persisted session status is still active
    /// (`pending`/`running`) — candidates for the startup sweep.
    pub fn active_sessions(&self) -> Vec<IssueId> {
        self.sessions
            .iter()
            .filter(|(_, record)| record.status.is_some_and(|s| s.is_active()))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
