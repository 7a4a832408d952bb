// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Issue entity and session lifecycle.
//!
//! An issue is a long-running conversation with one engine. Its
//! `session_status` tracks the lifecycle of the *current* execution:
//! `None → pending → running → {completed | failed | cancelled}`.
//! Terminal states are absorbing until a new execution starts.

use crate::engines::EngineKind;
use crate::id::{IssueId, ProjectId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Board column the issue sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Todo,
    Working,
    Review,
    Done,
}

/// Status of the issue's current (or most recent) engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Execution is being spawned
    Pending,
    /// Engine is actively working
    Running,
    /// Engine finished with exit 0 and no error entry
    Completed,
    /// Engine failed or crashed
    Failed,
    /// User cancelled the execution
    Cancelled,
}

impl SessionStatus {
    /// Whether this status is terminal (no further transitions until a new
    /// execution starts).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    /// Whether an execution is currently occupying the issue.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Pending | SessionStatus::Running)
    }

    /// Whether `next` is a legal successor of `current`.
    ///
    /// `None` (no session yet) admits only `Pending`. A new execution may
    /// leave any terminal state back to `Pending`.
    pub fn can_transition(current: Option<SessionStatus>, next: SessionStatus) -> bool {
        match current {
            None => next == SessionStatus::Pending,
            Some(SessionStatus::Pending) => {
                matches!(
                    next,
                    SessionStatus::Running | SessionStatus::Failed | SessionStatus::Cancelled
                )
            }
            Some(SessionStatus::Running) => next.is_terminal(),
            Some(s) if s.is_terminal() => next == SessionStatus::Pending,
            Some(_) => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// An issue record, as the engine layer sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub project_id: ProjectId,
    pub status: IssueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_status: Option<SessionStatus>,
    pub engine: EngineKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt: String,
    /// Engine-side session/thread id used to resume follow-up turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_session_id: Option<String>,
    #[serde(default)]
    pub dev_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
}

/// Builder for `Issue` with test defaults.
#[cfg(any(test, feature = "test-support"))]
pub struct IssueBuilder {
    id: IssueId,
    project_id: ProjectId,
    status: IssueStatus,
    session_status: Option<SessionStatus>,
    engine: EngineKind,
    model: Option<String>,
    prompt: String,
    external_session_id: Option<String>,
    dev_mode: bool,
    permission_mode: Option<String>,
}

#[cfg(any(test, feature = "test-support"))]
impl Default for IssueBuilder {
    fn default() -> Self {
        Self {
            id: IssueId::new("issue-1"),
            project_id: ProjectId::new("project-1"),
            status: IssueStatus::Working,
            session_status: None,
            engine: EngineKind::Claude,
            model: None,
            prompt: "Fix the bug".to_string(),
            external_session_id: None,
            dev_mode: false,
            permission_mode: None,
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl IssueBuilder {
    pub fn id(mut self, v: impl Into<IssueId>) -> Self {
        self.id = v.into();
        self
    }
    pub fn engine(mut self, v: EngineKind) -> Self {
        self.engine = v;
        self
    }
    pub fn prompt(mut self, v: impl Into<String>) -> Self {
        self.prompt = v.into();
        self
    }
    pub fn session_status(mut self, v: SessionStatus) -> Self {
        self.session_status = Some(v);
        self
    }
    pub fn external_session_id(mut self, v: impl Into<String>) -> Self {
        self.external_session_id = Some(v.into());
        self
    }
    pub fn dev_mode(mut self, v: bool) -> Self {
        self.dev_mode = v;
        self
    }
    pub fn build(self) -> Issue {
        Issue {
            id: self.id,
            project_id: self.project_id,
            status: self.status,
            session_status: self.session_status,
            engine: self.engine,
            model: self.model,
            prompt: self.prompt,
            external_session_id: self.external_session_id,
            dev_mode: self.dev_mode,
            permission_mode: self.permission_mode,
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Issue {
    /// Create a builder with test defaults.
    pub fn builder() -> IssueBuilder {
        IssueBuilder::default()
    }
}

#[cfg(test)]
#[path = "issue_tests.rs"]
mod tests;
