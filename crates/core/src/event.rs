// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events fanned out by the issue engine.
//!
//! Serializes with `{"type": "issue:log", ...fields}` format. The
//! `execution_id` rides on state-change payloads so consumers can discard
//! stale terminal events from a superseded turn.

use crate::entry::NormalizedEntry;
use crate::id::{ExecutionId, IssueId};
use crate::issue::SessionStatus;
use serde::{Deserialize, Serialize};

/// Subscription key describing which events a subscriber wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    IssueUpdated,
    IssueLog,
    IssueStateChange,
    IssueSettled,
    IssueActivity,
    ChangesSummary,
}

/// Events emitted on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    #[serde(rename = "issue:updated")]
    IssueUpdated { issue_id: IssueId },

    /// One normalized entry reached the pipeline.
    #[serde(rename = "issue:log")]
    IssueLog {
        issue_id: IssueId,
        entry: NormalizedEntry,
    },

    /// The issue's session status changed.
    #[serde(rename = "issue:state")]
    IssueStateChange {
        issue_id: IssueId,
        execution_id: ExecutionId,
        status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// An execution finished and its resources were released.
    #[serde(rename = "issue:settled")]
    IssueSettled {
        issue_id: IssueId,
        execution_id: ExecutionId,
        status: SessionStatus,
    },

    /// Lightweight liveness signal (tool started, message streamed).
    #[serde(rename = "issue:activity")]
    IssueActivity {
        issue_id: IssueId,
        description: String,
    },

    /// Aggregated description of workspace changes for an issue.
    #[serde(rename = "changes:summary")]
    ChangesSummary { issue_id: IssueId, summary: String },
}

impl EngineEvent {
    /// The subscription kind this event matches.
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::IssueUpdated { .. } => EventKind::IssueUpdated,
            EngineEvent::IssueLog { .. } => EventKind::IssueLog,
            EngineEvent::IssueStateChange { .. } => EventKind::IssueStateChange,
            EngineEvent::IssueSettled { .. } => EventKind::IssueSettled,
            EngineEvent::IssueActivity { .. } => EventKind::IssueActivity,
            EngineEvent::ChangesSummary { .. } => EventKind::ChangesSummary,
        }
    }

    /// The issue this event concerns.
    pub fn issue_id(&self) -> &IssueId {
        match self {
            EngineEvent::IssueUpdated { issue_id }
            | EngineEvent::IssueLog { issue_id, .. }
            | EngineEvent::IssueStateChange { issue_id, .. }
            | EngineEvent::IssueSettled { issue_id, .. }
            | EngineEvent::IssueActivity { issue_id, .. }
            | EngineEvent::ChangesSummary { issue_id, .. } => issue_id,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
