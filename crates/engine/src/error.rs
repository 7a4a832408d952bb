// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the issue engine

use ov_adapters::EngineError;
use ov_core::{IssueId, SessionStatus};
use ov_storage::StoreError;
use thiserror::Error;

/// Errors surfaced by issue-engine operations.
#[derive(Debug, Error)]
pub enum IssueEngineError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("session_limit_reached")]
    SessionLimitReached,
    #[error("no execution context recorded for issue {0}")]
    UnknownIssue(IssueId),
    #[error("issue {issue_id} cannot restart from status {status:?}")]
    NotRestartable {
        issue_id: IssueId,
        status: Option<SessionStatus>,
    },
    #[error("internal error: {0}")]
    Internal(String),
}
