// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ov_core::CommandCategory;
use yare::parameterized;

fn normalizer() -> ClaudeNormalizer {
    ClaudeNormalizer::new(Vec::new())
}

fn filtered(tool: &str) -> ClaudeNormalizer {
    ClaudeNormalizer::new(vec![WriteFilterRule::tool_name(tool)])
}

const SINGLE_TURN: [&str; 4] = [
    r#"{"type":"system","subtype":"init","cwd":"/tmp","session_id":"s1"}"#,
    r#"{"type":"assistant","message":{"id":"m1","content":[{"type":"text","text":"Hello"}]}}"#,
    r#"{"type":"assistant","message":{"id":"m2","content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}]}}"#,
    r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"a\nb","is_error":false}]}}"#,
];

#[test]
fn single_turn_produces_expected_sequence() {
    let mut n = normalizer();
    let entries: Vec<NormalizedEntry> =
        SINGLE_TURN.iter().flat_map(|line| n.parse(line)).collect();

    assert_eq!(entries.len(), 4);

    assert_eq!(entries[0].entry_type, EntryType::SystemMessage);
    assert_eq!(entries[0].subtype(), Some("init"));

    assert_eq!(entries[1].entry_type, EntryType::AssistantMessage);
    assert_eq!(entries[1].content, "Hello");

    assert_eq!(entries[2].entry_type, EntryType::ToolUse);
    assert_eq!(entries[2].tool_name(), Some("Bash"));
    assert!(matches!(
        entries[2].tool_action.as_ref().unwrap(),
        ToolAction::CommandRun { command, category: CommandCategory::Read, .. } if command == "ls"
    ));

    assert_eq!(entries[3].entry_type, EntryType::ToolUse);
    assert!(entries[3].is_result());
    assert_eq!(entries[3].content, "a\nb");
    assert_eq!(entries[3].tool_call_id(), Some("t1"));
}

#[test]
fn filter_rule_suppresses_call_and_result() {
    let mut n = filtered("Bash");
    let entries: Vec<NormalizedEntry> =
        SINGLE_TURN.iter().flat_map(|line| n.parse(line)).collect();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].subtype(), Some("init"));
    assert_eq!(entries[1].content, "Hello");
}

#[test]
fn filtered_id_is_consumed_once() {
    let mut n = filtered("Bash");
    n.parse(SINGLE_TURN[2]);
    assert!(n.parse(SINGLE_TURN[3]).is_empty());
    // A later result with the same id is no longer suppressed
    assert_eq!(n.parse(SINGLE_TURN[3]).len(), 1);
}

#[test]
fn blank_input_is_empty() {
    let mut n = normalizer();
    assert!(n.parse("").is_empty());
    assert!(n.parse("   \t ").is_empty());
}

#[test]
fn non_json_becomes_system_message() {
    let mut n = normalizer();
    let entries = n.parse("thread panicked at src/main.rs:10");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_type, EntryType::SystemMessage);
    assert_eq!(entries[0].content, "thread panicked at src/main.rs:10");
}

#[test]
fn normalizer_is_total_over_hostile_input() {
    let mut n = normalizer();
    for line in [
        "{}",
        "[]",
        "null",
        "42",
        r#"{"type":"assistant"}"#,
        r#"{"type":"assistant","message":{"content":"not-an-array"}}"#,
        r#"{"type":"user","message":{}}"#,
        r#"{"type":"result"}"#,
        r#"{"type":"content_block_delta"}"#,
        "\u{0}\u{1}\u{2}",
    ] {
        let _ = n.parse(line);
    }
}

#[test]
fn mixed_text_and_tool_blocks_emit_both() {
    let mut n = normalizer();
    let line = r#"{"type":"assistant","message":{"content":[
        {"type":"text","text":"Let me check"},
        {"type":"tool_use","id":"t9","name":"Read","input":{"file_path":"/etc/hosts"}}
    ]}}"#;
    let entries = n.parse(line);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].content, "Let me check");
    assert!(matches!(
        entries[1].tool_action.as_ref().unwrap(),
        ToolAction::FileRead { path } if path == "/etc/hosts"
    ));
}

#[test]
fn error_results_become_error_messages() {
    let mut n = normalizer();
    let line = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"no such file","is_error":true}]}}"#;
    let entries = n.parse(line);
    assert_eq!(entries[0].entry_type, EntryType::ErrorMessage);
    assert_eq!(entries[0].content, "no such file");
}

#[test]
fn local_command_stdout_markers_are_stripped() {
    let mut n = normalizer();
    let line = r#"{"type":"user","message":{"content":"<local-command-stdout>build ok</local-command-stdout>"}}"#;
    let entries = n.parse(line);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_type, EntryType::SystemMessage);
    assert_eq!(entries[0].subtype(), Some("command_output"));
    assert_eq!(entries[0].content, "build ok");
}

#[test]
fn plain_string_user_content_is_ignored() {
    let mut n = normalizer();
    assert!(n
        .parse(r#"{"type":"user","message":{"content":"just an echo"}}"#)
        .is_empty());
}

#[test]
fn successful_result_summarizes_usage() {
    let mut n = normalizer();
    let line = r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":4200,"total_cost_usd":0.0123,"usage":{"input_tokens":12500,"output_tokens":3400}}"#;
    let entries = n.parse(line);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_type, EntryType::SystemMessage);
    assert_eq!(entries[0].content, "4.2s · 12.5k input · 3.4k output · $0.0123");
    assert_eq!(
        entries[0].metadata.get(meta::TURN_COMPLETED),
        Some(&serde_json::Value::Bool(true))
    );
}

#[test]
fn failed_result_normalizes_first_error() {
    let mut n = normalizer();
    let long_message = "x".repeat(500);
    let line = format!(
        r#"{{"type":"result","subtype":"error_during_execution","errors":[{{"message":"{long_message}"}}]}}"#
    );
    let entries = n.parse(&line);
    assert_eq!(entries[0].entry_type, EntryType::ErrorMessage);
    assert!(entries[0].content.len() <= 300);
    assert_eq!(
        entries[0].metadata.get("errorKind"),
        Some(&serde_json::Value::String("error".to_string()))
    );
}

#[test]
fn known_crash_signature_gets_stable_kind_and_hint() {
    let mut n = normalizer();
    let line = r#"{"type":"result","subtype":"error_during_execution","errors":["rust-analyzer server crashed"]}"#;
    let entries = n.parse(line);
    assert_eq!(
        entries[0].metadata.get("errorKind"),
        Some(&serde_json::Value::String("lsp_crash".to_string()))
    );
    assert!(entries[0].content.contains("rust-analyzer"));
    assert!(entries[0].content.contains("restart"));
}

#[parameterized(
    init = { r#"{"type":"system","subtype":"init","cwd":"/w"}"#, "init" },
    compact = { r#"{"type":"system","subtype":"compact_boundary"}"#, "compact_boundary" },
    hook = { r#"{"type":"system","subtype":"hook_response","output":"ok"}"#, "hook_response" },
)]
fn system_subtypes(line: &str, subtype: &str) {
    let mut n = normalizer();
    let entries = n.parse(line);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_type, EntryType::SystemMessage);
    assert_eq!(entries[0].subtype(), Some(subtype));
}

#[test]
fn streaming_deltas_are_marked() {
    let mut n = normalizer();
    let entries = n.parse(r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"par"}}"#);
    assert_eq!(entries[0].entry_type, EntryType::AssistantMessage);
    assert_eq!(entries[0].content, "par");
    assert_eq!(
        entries[0].metadata.get(meta::STREAMING),
        Some(&serde_json::Value::Bool(true))
    );
}

#[test]
fn thinking_deltas_become_thinking_entries() {
    let mut n = normalizer();
    let entries =
        n.parse(r#"{"type":"content_block_delta","delta":{"type":"thinking_delta","thinking":"hm"}}"#);
    assert_eq!(entries[0].entry_type, EntryType::Thinking);
}

#[test]
fn line_timestamp_is_attached() {
    let mut n = normalizer();
    let line = r#"{"type":"assistant","timestamp":"2026-07-01T10:00:00Z","message":{"content":[{"type":"text","text":"hi"}]}}"#;
    let entries = n.parse(line);
    assert_eq!(entries[0].timestamp.as_deref(), Some("2026-07-01T10:00:00Z"));
}

#[parameterized(
    read = { "Read", r#"{"file_path":"/a"}"# },
    write = { "Write", r#"{"file_path":"/a"}"# },
    notebook = { "NotebookEdit", r#"{"notebook_path":"/n.ipynb"}"# },
    grep = { "Grep", r#"{"pattern":"fn main"}"# },
    webfetch = { "WebFetch", r#"{"url":"https://x"}"# },
)]
fn classification_covers_known_tools(name: &str, input: &str) {
    let input: serde_json::Value = serde_json::from_str(input).unwrap();
    let action = classify_tool(name, &input);
    assert!(!matches!(action, ToolAction::Tool { .. }));
    assert!(!matches!(action, ToolAction::Other { .. }));
}

#[test]
fn unknown_tools_keep_name_and_args() {
    let input = serde_json::json!({"todos": []});
    let action = classify_tool("TodoWrite", &input);
    assert!(matches!(action, ToolAction::Tool { name, .. } if name == "TodoWrite"));
}
