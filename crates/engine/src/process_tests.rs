// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ov_adapters::{EngineExecutor, FakeEngine, FakeEngineConfig, SpawnOptions};
use std::sync::atomic::{AtomicUsize, Ordering};

async fn spawn_fake(fake: &FakeEngine, execution: &str) -> ProcessHandle {
    let opts = SpawnOptions {
        issue_id: IssueId::new("issue-1"),
        execution_id: ExecutionId::new(execution),
        prompt: "p".to_string(),
        working_dir: None,
        model: None,
        permission_mode: None,
        external_session_id: None,
    };
    fake.spawn(&opts).await.unwrap().handle
}

fn held_open_fake() -> FakeEngine {
    FakeEngine::new(FakeEngineConfig {
        exit_code: None,
        ..FakeEngineConfig::default()
    })
}

fn manager(cap: usize) -> ProcessManager {
    ProcessManager::new(cap, Duration::from_millis(200))
}

#[tokio::test]
async fn register_and_lookup() {
    let fake = held_open_fake();
    let pm = manager(4);
    let handle = spawn_fake(&fake, "e1").await;

    pm.register(
        ExecutionId::new("e1"),
        IssueId::new("i1"),
        handle,
        EXECUTION_GROUP,
    )
    .unwrap();

    assert!(pm.has(&ExecutionId::new("e1")));
    assert_eq!(pm.active().len(), 1);
    assert_eq!(pm.active_in_group(EXECUTION_GROUP).len(), 1);
    assert!(pm
        .active_for_issue(&IssueId::new("i1"))
        .is_some_and(|p| p.id == "e1"));
}

#[tokio::test]
async fn group_cap_yields_session_limit_error() {
    let fake = held_open_fake();
    let pm = manager(1);

    pm.register(
        ExecutionId::new("e1"),
        IssueId::new("i1"),
        spawn_fake(&fake, "e1").await,
        EXECUTION_GROUP,
    )
    .unwrap();
    assert!(!pm.has_capacity(EXECUTION_GROUP));

    let err = pm
        .register(
            ExecutionId::new("e2"),
            IssueId::new("i2"),
            spawn_fake(&fake, "e2").await,
            EXECUTION_GROUP,
        )
        .unwrap_err();
    assert_eq!(
        err,
        ProcessManagerError::SessionLimitReached {
            group: EXECUTION_GROUP.to_string()
        }
    );

    // A different group is unaffected
    pm.register(
        ExecutionId::new("e3"),
        IssueId::new("i3"),
        spawn_fake(&fake, "e3").await,
        "terminal",
    )
    .unwrap();
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let fake = held_open_fake();
    let pm = manager(4);
    pm.register(
        ExecutionId::new("e1"),
        IssueId::new("i1"),
        spawn_fake(&fake, "e1").await,
        EXECUTION_GROUP,
    )
    .unwrap();
    let err = pm
        .register(
            ExecutionId::new("e1"),
            IssueId::new("i1"),
            spawn_fake(&fake, "e1b").await,
            EXECUTION_GROUP,
        )
        .unwrap_err();
    assert_eq!(err, ProcessManagerError::AlreadyRegistered(ExecutionId::new("e1")));
}

#[tokio::test]
async fn exit_hooks_fire_and_entry_is_removed() {
    let fake = held_open_fake();
    let pm = manager(4);
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = Arc::clone(&fired);
    pm.on_exit(move |process, code| {
        assert_eq!(process.id, "e1");
        assert_eq!(code, Some(3));
        fired_clone.fetch_add(1, Ordering::SeqCst);
    });

    pm.register(
        ExecutionId::new("e1"),
        IssueId::new("i1"),
        spawn_fake(&fake, "e1").await,
        EXECUTION_GROUP,
    )
    .unwrap();

    pm.notify_exit(&ExecutionId::new("e1"), Some(3));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!pm.has(&ExecutionId::new("e1")));

    // Idempotent: unknown id is a no-op
    pm.notify_exit(&ExecutionId::new("e1"), Some(3));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn force_kill_escalates_for_stubborn_children() {
    let fake = FakeEngine::new(FakeEngineConfig {
        exit_code: None,
        ignore_interrupt: true,
        ..FakeEngineConfig::default()
    });
    let pm = manager(4);
    let handle = spawn_fake(&fake, "e1").await;
    pm.register(
        ExecutionId::new("e1"),
        IssueId::new("i1"),
        handle.clone(),
        EXECUTION_GROUP,
    )
    .unwrap();

    pm.force_kill(&ExecutionId::new("e1")).await;
    assert!(!handle.is_running());
}

#[tokio::test]
async fn gc_removes_old_corpses_only() {
    let fake = held_open_fake();
    let pm = manager(4);
    let live = spawn_fake(&fake, "e1").await;
    let dead = spawn_fake(&fake, "e2").await;
    dead.kill().await;

    pm.register(ExecutionId::new("e1"), IssueId::new("i1"), live, EXECUTION_GROUP)
        .unwrap();
    pm.register(ExecutionId::new("e2"), IssueId::new("i2"), dead, EXECUTION_GROUP)
        .unwrap();

    // Zero max-age: any dead entry is stale immediately
    pm.collect_garbage(Duration::from_millis(0));
    assert!(pm.has(&ExecutionId::new("e1")), "running child survives GC");
    assert!(!pm.has(&ExecutionId::new("e2")), "corpse is reaped");
}
