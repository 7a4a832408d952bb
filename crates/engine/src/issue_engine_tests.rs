// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ov_adapters::{FakeCall, FakeEngine, FakeEngineConfig};
use std::time::Duration;
use tempfile::TempDir;

const ASSISTANT_LINE: &str =
    r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello"}]}}"#;
const TOOL_LINE: &str = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}]}}"#;

struct Harness {
    engine: Arc<IssueEngine>,
    fake: FakeEngine,
    _dir: TempDir,
}

fn harness(fake: FakeEngine) -> Harness {
    harness_with_config(fake, Config::default())
}

fn harness_with_config(fake: FakeEngine, config: Config) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(config);
    let store = Arc::new(LogStore::open(dir.path()).unwrap());
    let registry = Arc::new(
        EngineRegistry::new(Arc::clone(&config)).with_executor(Arc::new(fake.clone())),
    );
    Harness {
        engine: IssueEngine::new(config, store, registry),
        fake,
        _dir: dir,
    }
}

fn issue() -> IssueId {
    IssueId::new("issue-1")
}

fn request(prompt: &str) -> ExecuteRequest {
    ExecuteRequest {
        engine: EngineKind::Claude,
        prompt: prompt.to_string(),
        working_dir: None,
        model: None,
        permission_mode: None,
    }
}

async fn await_settled(sub: &mut crate::Subscription) -> SessionStatus {
    let event = tokio::time::timeout(Duration::from_secs(5), sub.rx.recv())
        .await
        .expect("settled event within deadline")
        .expect("bus open");
    match event {
        ov_core::EngineEvent::IssueSettled { status, .. } => status,
        other => panic!("unexpected event: {other:?}"),
    }
}

fn all_logs(engine: &IssueEngine, dev_mode: bool) -> Vec<NormalizedEntry> {
    engine
        .get_logs(&issue(), dev_mode, &GetLogsOptions::default())
        .unwrap()
}

#[tokio::test]
async fn execute_persists_user_message_and_normalized_entries() {
    let h = harness(FakeEngine::with_script([ASSISTANT_LINE, TOOL_LINE]));
    let mut settled = h.engine.subscribe_settled(Some(issue()));

    h.engine
        .execute_issue(issue(), request("fix the bug"))
        .await
        .unwrap();
    assert_eq!(await_settled(&mut settled).await, SessionStatus::Completed);

    let logs = all_logs(&h.engine, true);
    assert_eq!(logs.len(), 3);
    assert_eq!(logs[0].entry_type, EntryType::UserMessage);
    assert_eq!(logs[0].content, "fix the bug");
    assert_eq!(logs[0].turn_index, 0);
    assert_eq!(logs[0].entry_index, 0);

    assert_eq!(logs[1].entry_type, EntryType::AssistantMessage);
    assert_eq!(logs[1].content, "Hello");
    assert_eq!(logs[1].entry_index, 1);
    assert_eq!(logs[1].reply_to, logs[0].message_id, "agent output links the user message");

    assert_eq!(logs[2].entry_type, EntryType::ToolUse);
    assert_eq!(logs[2].tool_name(), Some("Bash"));
}

#[tokio::test]
async fn status_reaches_completed_and_turns_increment() {
    let h = harness(FakeEngine::with_script([ASSISTANT_LINE]));
    let mut settled = h.engine.subscribe_settled(Some(issue()));

    h.engine.execute_issue(issue(), request("one")).await.unwrap();
    await_settled(&mut settled).await;
    assert_eq!(
        h.engine.store().session_status(&issue()),
        Some(SessionStatus::Completed)
    );

    h.engine.execute_issue(issue(), request("two")).await.unwrap();
    await_settled(&mut settled).await;

    let logs = all_logs(&h.engine, true);
    let user_turns: Vec<u32> = logs
        .iter()
        .filter(|e| e.entry_type == EntryType::UserMessage)
        .map(|e| e.turn_index)
        .collect();
    assert_eq!(user_turns, vec![0, 1]);
}

#[tokio::test]
async fn state_events_carry_execution_id() {
    let h = harness(FakeEngine::with_script([ASSISTANT_LINE]));
    let mut states = h.engine.subscribe_state(Some(issue()));
    let mut settled = h.engine.subscribe_settled(Some(issue()));

    let execution_id = h
        .engine
        .execute_issue(issue(), request("go"))
        .await
        .unwrap();
    await_settled(&mut settled).await;

    let mut seen = Vec::new();
    while let Ok(event) = states.rx.try_recv() {
        if let ov_core::EngineEvent::IssueStateChange {
            execution_id: id,
            status,
            ..
        } = event
        {
            assert_eq!(id, execution_id);
            seen.push(status);
        }
    }
    assert_eq!(
        seen,
        vec![
            SessionStatus::Pending,
            SessionStatus::Running,
            SessionStatus::Completed
        ]
    );
}

#[tokio::test]
async fn nonzero_exit_fails_with_stderr_or_exit_code() {
    let fake = FakeEngine::with_script([ASSISTANT_LINE]);
    fake.set_exit_code(Some(3));
    let h = harness(fake);
    let mut settled = h.engine.subscribe_settled(Some(issue()));

    h.engine.execute_issue(issue(), request("go")).await.unwrap();
    assert_eq!(await_settled(&mut settled).await, SessionStatus::Failed);
    assert_eq!(h.engine.last_error(&issue()).as_deref(), Some("exit code 3"));
    assert_eq!(
        h.engine.store().session_record(&issue()).unwrap().last_error.as_deref(),
        Some("exit code 3")
    );
}

#[tokio::test]
async fn error_entry_fails_even_with_exit_zero() {
    let error_line = r#"{"type":"result","subtype":"error_during_execution","errors":["boom"]}"#;
    let h = harness(FakeEngine::with_script([ASSISTANT_LINE, error_line]));
    let mut settled = h.engine.subscribe_settled(Some(issue()));

    h.engine.execute_issue(issue(), request("go")).await.unwrap();
    assert_eq!(await_settled(&mut settled).await, SessionStatus::Failed);
}

#[tokio::test]
async fn cancel_produces_cancelled_status_and_is_idempotent() {
    let fake = FakeEngine::new(FakeEngineConfig {
        script: vec![ASSISTANT_LINE.to_string()],
        exit_code: None,
        ..FakeEngineConfig::default()
    });
    let h = harness(fake);
    let mut settled = h.engine.subscribe_settled(Some(issue()));

    h.engine.execute_issue(issue(), request("go")).await.unwrap();
    assert!(h.engine.has_active_process_for_issue(&issue()));

    let status = h.engine.cancel_issue(&issue()).await.unwrap();
    assert_eq!(status, Some(SessionStatus::Cancelled));
    assert_eq!(await_settled(&mut settled).await, SessionStatus::Cancelled);
    assert!(!h.engine.has_active_process_for_issue(&issue()));

    // Second cancel: no active execution, same answer, no side effects
    let again = h.engine.cancel_issue(&issue()).await.unwrap();
    assert_eq!(again, Some(SessionStatus::Cancelled));
}

#[tokio::test]
async fn queue_on_busy_persists_without_spawning() {
    let fake = FakeEngine::new(FakeEngineConfig {
        exit_code: None,
        ..FakeEngineConfig::default()
    });
    let h = harness(fake.clone());
    h.engine.execute_issue(issue(), request("go")).await.unwrap();

    let outcome = h
        .engine
        .follow_up_issue(issue(), "also this".to_string(), None, None, BusyAction::Queue)
        .await
        .unwrap();
    assert!(matches!(outcome, FollowUpOutcome::Queued { .. }));

    let pending = h.engine.store().pending_for(&issue());
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].content, "also this");

    // Exactly one spawn happened; the follow-up queued instead
    let spawns = fake
        .calls()
        .iter()
        .filter(|c| matches!(c, FakeCall::Spawn { .. } | FakeCall::FollowUp { .. }))
        .count();
    assert_eq!(spawns, 1);

    h.engine.cancel_issue(&issue()).await.unwrap();
}

#[tokio::test]
async fn pending_messages_ride_next_execution_and_dispatch_on_success() {
    let h = harness(FakeEngine::with_script([ASSISTANT_LINE]));
    let mut settled = h.engine.subscribe_settled(Some(issue()));

    // First turn, then queue while idle is not possible via follow-up, so
    // enqueue directly (the transport does the same for offline issues).
    h.engine.execute_issue(issue(), request("go")).await.unwrap();
    await_settled(&mut settled).await;
    h.engine.store().enqueue_pending(&issue(), "queued extra").unwrap();

    let outcome = h
        .engine
        .follow_up_issue(issue(), "follow up".to_string(), None, None, BusyAction::Queue)
        .await
        .unwrap();
    assert!(matches!(outcome, FollowUpOutcome::Started { .. }));
    await_settled(&mut settled).await;

    // The queued message was folded into the prompt...
    let follow_up_prompt = h
        .fake
        .calls()
        .iter()
        .find_map(|c| match c {
            FakeCall::FollowUp { prompt, .. } => Some(prompt.clone()),
            _ => None,
        })
        .expect("follow-up spawn recorded");
    assert_eq!(follow_up_prompt, "follow up\n\nqueued extra");

    // ...and dispatched exactly once
    assert!(h.engine.store().pending_for(&issue()).is_empty());
}

#[tokio::test]
async fn pending_messages_survive_failed_executions() {
    let fake = FakeEngine::with_script([ASSISTANT_LINE]);
    fake.set_exit_code(Some(1));
    let h = harness(fake);
    let mut settled = h.engine.subscribe_settled(Some(issue()));

    h.engine.store().enqueue_pending(&issue(), "precious").unwrap();
    h.engine.execute_issue(issue(), request("go")).await.unwrap();
    assert_eq!(await_settled(&mut settled).await, SessionStatus::Failed);

    // At-least-once: the failed call did not consume the message
    assert_eq!(h.engine.store().pending_for(&issue()).len(), 1);
}

#[tokio::test]
async fn follow_up_resumes_stored_external_session() {
    let h = harness(FakeEngine::with_script([ASSISTANT_LINE]));
    let mut settled = h.engine.subscribe_settled(Some(issue()));

    h.engine.execute_issue(issue(), request("go")).await.unwrap();
    await_settled(&mut settled).await;
    let stored = h.engine.store().external_session_id(&issue()).unwrap();

    h.engine
        .follow_up_issue(issue(), "more".to_string(), None, None, BusyAction::Queue)
        .await
        .unwrap();
    await_settled(&mut settled).await;

    let resumed = h.fake.calls().iter().any(|c| {
        matches!(c, FakeCall::FollowUp { external_session_id, .. } if *external_session_id == stored)
    });
    assert!(resumed, "follow-up resumed the stored session id");
}

#[tokio::test]
async fn restart_requires_terminal_failure_and_discards_pending() {
    let fake = FakeEngine::with_script([ASSISTANT_LINE]);
    fake.set_exit_code(Some(1));
    let h = harness(fake.clone());
    let mut settled = h.engine.subscribe_settled(Some(issue()));

    h.engine.execute_issue(issue(), request("original prompt")).await.unwrap();
    assert_eq!(await_settled(&mut settled).await, SessionStatus::Failed);

    h.engine.store().enqueue_pending(&issue(), "stale request").unwrap();
    fake.set_exit_code(Some(0));

    h.engine.restart_issue(issue()).await.unwrap();
    assert_eq!(await_settled(&mut settled).await, SessionStatus::Completed);

    // Pending dropped without delivery; prompt is the stored one only
    assert!(h.engine.store().pending_for(&issue()).is_empty());
    let last_spawn = h
        .fake
        .calls()
        .iter()
        .rev()
        .find_map(|c| match c {
            FakeCall::Spawn { prompt } => Some(prompt.clone()),
            _ => None,
        })
        .expect("restart spawned fresh");
    assert_eq!(last_spawn, "original prompt");
}

#[tokio::test]
async fn restart_rejected_while_completed() {
    let h = harness(FakeEngine::with_script([ASSISTANT_LINE]));
    let mut settled = h.engine.subscribe_settled(Some(issue()));
    h.engine.execute_issue(issue(), request("go")).await.unwrap();
    await_settled(&mut settled).await;

    let err = h.engine.restart_issue(issue()).await.unwrap_err();
    assert!(matches!(err, IssueEngineError::NotRestartable { .. }));
}

#[tokio::test]
async fn session_limit_is_a_typed_error() {
    let mut config = Config::default();
    config.limits.max_concurrent_sessions = 1;
    let fake = FakeEngine::new(FakeEngineConfig {
        exit_code: None,
        ..FakeEngineConfig::default()
    });
    let h = harness_with_config(fake, config);

    h.engine.execute_issue(issue(), request("go")).await.unwrap();
    let err = h
        .engine
        .execute_issue(IssueId::new("issue-2"), request("go"))
        .await
        .unwrap_err();
    assert!(matches!(err, IssueEngineError::SessionLimitReached));

    h.engine.cancel_all().await;
}

#[tokio::test]
async fn spawn_failure_marks_issue_failed() {
    let fake = FakeEngine::default();
    fake.set_fail_spawn(Some("no binary".to_string()));
    let h = harness(fake);

    let err = h.engine.execute_issue(issue(), request("go")).await.unwrap_err();
    assert!(matches!(err, IssueEngineError::Engine(_)));
    assert_eq!(
        h.engine.store().session_status(&issue()),
        Some(SessionStatus::Failed)
    );
    // The lock was released: a later execute works again
    let fake2 = h.fake.clone();
    fake2.set_fail_spawn(None);
    let mut settled = h.engine.subscribe_settled(Some(issue()));
    h.engine.execute_issue(issue(), request("retry")).await.unwrap();
    await_settled(&mut settled).await;
}

#[tokio::test]
async fn get_logs_hides_tool_rows_outside_dev_mode() {
    let h = harness(FakeEngine::with_script([ASSISTANT_LINE, TOOL_LINE]));
    let mut settled = h.engine.subscribe_settled(Some(issue()));
    h.engine.execute_issue(issue(), request("go")).await.unwrap();
    await_settled(&mut settled).await;

    let dev = all_logs(&h.engine, true);
    assert_eq!(dev.len(), 3);

    let user_view = all_logs(&h.engine, false);
    let types: Vec<EntryType> = user_view.iter().map(|e| e.entry_type).collect();
    assert_eq!(types, vec![EntryType::UserMessage, EntryType::AssistantMessage]);
}

#[tokio::test]
async fn get_logs_is_ascending_by_message_id() {
    let h = harness(FakeEngine::with_script([ASSISTANT_LINE, TOOL_LINE, ASSISTANT_LINE]));
    let mut settled = h.engine.subscribe_settled(Some(issue()));
    h.engine.execute_issue(issue(), request("go")).await.unwrap();
    await_settled(&mut settled).await;

    let logs = all_logs(&h.engine, true);
    let ids: Vec<&MessageId> = logs.iter().filter_map(|e| e.message_id.as_ref()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[tokio::test]
async fn simultaneous_executes_serialize_on_the_issue_lock() {
    let h = harness(FakeEngine::with_script([ASSISTANT_LINE]));
    let mut settled = h.engine.subscribe_settled(Some(issue()));

    let first = {
        let engine = Arc::clone(&h.engine);
        tokio::spawn(async move { engine.execute_issue(issue(), request("first")).await })
    };
    let second = {
        let engine = Arc::clone(&h.engine);
        tokio::spawn(async move { engine.execute_issue(issue(), request("second")).await })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    await_settled(&mut settled).await;
    await_settled(&mut settled).await;

    let logs = all_logs(&h.engine, true);
    let users: Vec<(u32, u32)> = logs
        .iter()
        .filter(|e| e.entry_type == EntryType::UserMessage)
        .map(|e| (e.turn_index, e.entry_index))
        .collect();
    // Two turns, strictly ordered; the second saw the first's rows
    assert_eq!(users, vec![(0, 0), (1, 0)]);

    // At no point were both executions active: every entry belongs to a
    // well-formed (turn, entry) order
    for pair in logs.windows(2) {
        assert!(
            (pair[0].turn_index, pair[0].entry_index) < (pair[1].turn_index, pair[1].entry_index)
        );
    }
}

#[tokio::test]
async fn follow_up_on_unknown_issue_is_an_error() {
    let h = harness(FakeEngine::default());
    let err = h
        .engine
        .follow_up_issue(
            IssueId::new("never-seen"),
            "hi".to_string(),
            None,
            None,
            BusyAction::Queue,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IssueEngineError::UnknownIssue(_)));
}

#[tokio::test]
async fn log_events_respect_cached_dev_mode() {
    let h = harness(FakeEngine::with_script([ASSISTANT_LINE, TOOL_LINE]));
    // Cache non-dev visibility before subscribing
    let _ = h.engine.get_logs(&issue(), false, &GetLogsOptions::default());

    let mut log_sub = h.engine.subscribe_log(Some(issue()));
    let mut settled = h.engine.subscribe_settled(Some(issue()));
    h.engine.execute_issue(issue(), request("go")).await.unwrap();
    await_settled(&mut settled).await;

    let mut seen = Vec::new();
    while let Ok(event) = log_sub.rx.try_recv() {
        if let ov_core::EngineEvent::IssueLog { entry, .. } = event {
            seen.push(entry.entry_type);
        }
    }
    assert_eq!(seen, vec![EntryType::UserMessage, EntryType::AssistantMessage]);
}

#[tokio::test]
async fn slash_commands_come_from_active_execution() {
    let init_line = r#"{"type":"system","subtype":"init","cwd":"/w","slash_commands":["/compact"]}"#;
    let fake = FakeEngine::new(FakeEngineConfig {
        script: vec![init_line.to_string()],
        exit_code: None,
        ..FakeEngineConfig::default()
    });
    let h = harness(fake);
    h.engine.execute_issue(issue(), request("go")).await.unwrap();

    // Give the script task a beat to emit
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.engine.is_turn_in_flight(&issue()));
    // The fake doesn't wire slash commands through wrap_stdout; the
    // accessor still answers from the active execution.
    let _ = h.engine.slash_commands(&issue());

    h.engine.cancel_issue(&issue()).await.unwrap();
}
