// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ov_core::{EntryType, ExecutionId, Metadata, SessionStatus};

fn log_event(issue: &str, turn: u32, entry: u32, id: &str) -> StorageEvent {
    StorageEvent::LogInserted {
        row: LogRow {
            id: MessageId::new(id),
            issue_id: IssueId::new(issue),
            execution_id: ExecutionId::new("exec-1"),
            turn_index: turn,
            entry_index: entry,
            entry_type: EntryType::AssistantMessage,
            content: format!("{turn}:{entry}"),
            metadata: Metadata::new(),
            reply_to: None,
            timestamp: None,
            visible: true,
        },
    }
}

#[test]
fn logs_stay_sorted_by_turn_and_entry() {
    let mut state = MaterializedState::default();
    state.apply(&log_event("i1", 0, 0, "a"));
    state.apply(&log_event("i1", 0, 1, "b"));
    state.apply(&log_event("i1", 1, 0, "c"));
    // Out-of-order replay (rotated WAL) still lands sorted
    state.apply(&log_event("i1", 0, 2, "d"));

    let keys: Vec<(u32, u32)> = state
        .logs_for(&IssueId::new("i1"))
        .iter()
        .map(|r| (r.turn_index, r.entry_index))
        .collect();
    assert_eq!(keys, vec![(0, 0), (0, 1), (0, 2), (1, 0)]);
}

#[test]
fn max_turn_index_tracks_latest() {
    let mut state = MaterializedState::default();
    let issue = IssueId::new("i1");
    assert_eq!(state.max_turn_index(&issue), None);
    state.apply(&log_event("i1", 0, 0, "a"));
    state.apply(&log_event("i1", 4, 0, "b"));
    assert_eq!(state.max_turn_index(&issue), Some(4));
}

#[test]
fn issues_are_isolated() {
    let mut state = MaterializedState::default();
    state.apply(&log_event("i1", 0, 0, "a"));
    state.apply(&log_event("i2", 7, 0, "b"));
    assert_eq!(state.logs_for(&IssueId::new("i1")).len(), 1);
    assert_eq!(state.max_turn_index(&IssueId::new("i2")), Some(7));
}

#[test]
fn pending_dispatch_marks_rows() {
    let mut state = MaterializedState::default();
    let issue = IssueId::new("i1");
    for n in 0..3 {
        state.apply(&StorageEvent::PendingEnqueued {
            row: PendingRow {
                id: MessageId::new(format!("p{n}")),
                issue_id: issue.clone(),
                content: format!("m{n}"),
                created_at: String::new(),
                dispatched: false,
            },
        });
    }
    state.apply(&StorageEvent::PendingDispatched {
        ids: vec![MessageId::new("p0"), MessageId::new("p2")],
    });

    let remaining = state.pending_for(&issue);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id.as_str(), "p1");
}

#[test]
fn session_status_and_error_accumulate() {
    let mut state = MaterializedState::default();
    let issue = IssueId::new("i1");
    state.apply(&StorageEvent::SessionStatusChanged {
        issue_id: issue.clone(),
        status: SessionStatus::Running,
        error: None,
    });
    state.apply(&StorageEvent::SessionStatusChanged {
        issue_id: issue.clone(),
        status: SessionStatus::Failed,
        error: Some("exit 1".to_string()),
    });

    let record = state.session(&issue).unwrap();
    assert_eq!(record.status, Some(SessionStatus::Failed));
    assert_eq!(record.last_error.as_deref(), Some("exit 1"));
}

#[test]
fn active_sessions_lists_pending_and_running() {
    let mut state = MaterializedState::default();
    for (issue, status) in [
        ("i1", SessionStatus::Running),
        ("i2", SessionStatus::Completed),
        ("i3", SessionStatus::Pending),
    ] {
        state.apply(&StorageEvent::SessionStatusChanged {
            issue_id: IssueId::new(issue),
            status,
            error: None,
        });
    }
    let mut active = state.active_sessions();
    active.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    assert_eq!(active, vec![IssueId::new("i1"), IssueId::new("i3")]);
}

#[test]
fn external_session_id_is_recorded() {
    let mut state = MaterializedState::default();
    let issue = IssueId::new("i1");
    state.apply(&StorageEvent::ExternalSessionAssigned {
        issue_id: issue.clone(),
        external_session_id: "thread-9".to_string(),
    });
    assert_eq!(
        state.session(&issue).unwrap().external_session_id.as_deref(),
        Some("thread-9")
    );
}
