// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ov_core::{meta, EntryType};

fn sample_row() -> LogRow {
    LogRow {
        id: MessageId::new("0192aa00-0000-7000-8000-000000000001"),
        issue_id: IssueId::new("issue-1"),
        execution_id: ExecutionId::new("exec-1"),
        turn_index: 3,
        entry_index: 0,
        entry_type: EntryType::AssistantMessage,
        content: "hello".to_string(),
        metadata: Metadata::new(),
        reply_to: None,
        timestamp: Some("2026-07-01T10:00:00Z".to_string()),
        visible: true,
    }
}

#[test]
fn log_row_round_trips_to_entry() {
    let row = sample_row();
    let entry = row.to_entry();
    assert_eq!(entry.message_id.as_ref(), Some(&row.id));
    assert_eq!(entry.turn_index, 3);
    assert_eq!(entry.content, "hello");
    assert_eq!(entry.timestamp.as_deref(), Some("2026-07-01T10:00:00Z"));
}

#[test]
fn storage_event_serializes_with_type_tag() {
    let event = StorageEvent::SessionStatusChanged {
        issue_id: IssueId::new("i1"),
        status: SessionStatus::Failed,
        error: Some("boom".to_string()),
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "session:status");
    assert_eq!(json["status"], "failed");
    assert_eq!(json["error"], "boom");
}

#[test]
fn storage_event_round_trips() {
    let event = StorageEvent::LogInserted { row: sample_row() };
    let json = serde_json::to_string(&event).unwrap();
    let back: StorageEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}

#[test]
fn tool_raw_blob_keeps_metadata() {
    let mut metadata = Metadata::new();
    metadata.insert(meta::TOOL_NAME.to_string(), "Bash".into());
    let blob = ToolRawBlob {
        tool_name: Some("Bash".to_string()),
        tool_call_id: Some("t1".to_string()),
        tool_action: None,
        metadata,
        content: "a\nb".to_string(),
    };
    let json = serde_json::to_value(&blob).unwrap();
    assert_eq!(json["metadata"]["toolName"], "Bash");
    assert_eq!(json["content"], "a\nb");
}
