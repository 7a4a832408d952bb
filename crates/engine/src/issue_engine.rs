// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The issue engine: one execution at a time per issue.
//!
//! Every mutating operation serializes on a per-issue async lock whose
//! guard travels into the execution's reader loop and is released at
//! settlement. That single mechanism enforces the at-most-one-active
//! invariant, orders turns, and lets `cancel` wait for settlement by
//! briefly taking the lock itself.

use crate::bus::{EventBus, Subscription};
use crate::error::IssueEngineError;
use crate::pending::collect_pending;
use crate::process::{ProcessManager, ProcessManagerError, EXECUTION_GROUP};
use ov_adapters::{
    EngineError, EngineRegistry, LogNormalizer, ProcessHandle, SharedSlashCommands,
    SpawnOptions, SpawnedProcess, StderrTail,
};
use ov_core::{
    is_visible_for_mode, meta, Config, EngineEvent, EngineKind, EntryType, EventKind,
    ExecutionId, IssueId, MessageId, NormalizedEntry, RingBuffer, SessionStatus,
};
use ov_storage::{Cursor, LogQuery, LogStore, PendingRow};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// Default page size for log reads without an explicit limit.
const DEFAULT_PAGE_LIMIT: usize = 100;

/// Parameters for starting an execution.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub engine: EngineKind,
    pub prompt: String,
    pub working_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
}

/// What a follow-up should do when a turn is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyAction {
    Queue,
    Cancel,
}

/// Result of a follow-up request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUpOutcome {
    /// The message was queued durably; no new execution was spawned.
    Queued { pending_id: MessageId },
    /// An execution was started (resumed or fresh).
    Started { execution_id: ExecutionId },
}

/// Read options for [`IssueEngine::get_logs`].
#[derive(Debug, Clone, Default)]
pub struct GetLogsOptions {
    pub cursor: Option<String>,
    pub before: Option<String>,
    pub limit: Option<usize>,
}

/// Per-issue request context, remembered across turns.
#[derive(Clone)]
struct IssueContext {
    engine: EngineKind,
    initial_prompt: String,
    working_dir: Option<PathBuf>,
    model: Option<String>,
    permission_mode: Option<String>,
}

/// Live state of the issue's active execution.
#[derive(Clone)]
struct ActiveExecution {
    execution_id: ExecutionId,
    engine: EngineKind,
    handle: ProcessHandle,
    slash_commands: SharedSlashCommands,
    ring: Arc<Mutex<RingBuffer<NormalizedEntry>>>,
    cancel_requested: Arc<AtomicBool>,
}

/// How a new execution addresses the engine session.
#[derive(Clone, Copy, PartialEq, Eq)]
enum SpawnMode {
    /// Follow up on a stored external session id when one exists.
    Auto,
    /// Always start a fresh session (restart path).
    Fresh,
}

/// The central coordinator.
pub struct IssueEngine {
    config: Arc<Config>,
    store: Arc<LogStore>,
    registry: Arc<EngineRegistry>,
    pm: ProcessManager,
    bus: EventBus,
    locks: Mutex<HashMap<IssueId, Arc<tokio::sync::Mutex<()>>>>,
    active: Mutex<HashMap<IssueId, ActiveExecution>>,
    contexts: Mutex<HashMap<IssueId, IssueContext>>,
    dev_mode: Mutex<HashMap<IssueId, bool>>,
    last_errors: Mutex<HashMap<IssueId, String>>,
}

impl IssueEngine {
    pub fn new(
        config: Arc<Config>,
        store: Arc<LogStore>,
        registry: Arc<EngineRegistry>,
    ) -> Arc<Self> {
        let pm = ProcessManager::new(
            config.limits.max_concurrent_sessions,
            Duration::from_millis(config.limits.kill_grace_ms),
        );
        Arc::new(Self {
            config,
            store,
            registry,
            pm,
            bus: EventBus::new(),
            locks: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            contexts: Mutex::new(HashMap::new()),
            dev_mode: Mutex::new(HashMap::new()),
            last_errors: Mutex::new(HashMap::new()),
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    pub fn process_manager(&self) -> &ProcessManager {
        &self.pm
    }

    /// Start the process-manager GC loop with the configured cadence.
    ///
    /// Must be called from within a tokio runtime; aborting the returned
    /// handle stops the loop.
    pub fn start_gc(&self) -> tokio::task::JoinHandle<()> {
        self.pm.start_gc(
            Duration::from_millis(self.config.limits.gc_interval_ms),
            Duration::from_millis(self.config.limits.max_entry_age_ms),
        )
    }

    fn issue_lock(&self, issue_id: &IssueId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(issue_id.clone())
            .or_default()
            .clone()
    }

    // ---- public operations ----

    /// Start an execution for an issue.
    ///
    /// Waits for any in-flight turn to settle (per-issue lock), folds
    /// queued pending messages into the prompt, persists the user-message
    /// row, spawns the engine, and hands the stream to a reader loop.
    pub async fn execute_issue(
        self: &Arc<Self>,
        issue_id: IssueId,
        request: ExecuteRequest,
    ) -> Result<ExecutionId, IssueEngineError> {
        self.remember_context(&issue_id, &request);
        let guard = self.issue_lock(&issue_id).lock_owned().await;
        self.start_execution(issue_id, request, guard, SpawnMode::Auto)
            .await
    }

    /// Follow up on an issue's conversation.
    ///
    /// Busy issues either queue the message durably or cancel the current
    /// turn first, per `busy_action`. Idle issues resume the stored
    /// engine session, falling back to a fresh spawn if the engine
    /// reports the session id stale.
    pub async fn follow_up_issue(
        self: &Arc<Self>,
        issue_id: IssueId,
        prompt: String,
        model: Option<String>,
        permission_mode: Option<String>,
        busy_action: BusyAction,
    ) -> Result<FollowUpOutcome, IssueEngineError> {
        let is_busy = self.active.lock().contains_key(&issue_id);
        if is_busy {
            match busy_action {
                BusyAction::Queue => return self.queue_follow_up(&issue_id, &prompt),
                BusyAction::Cancel => {
                    self.cancel_issue(&issue_id).await?;
                }
            }
        }

        let context = self
            .contexts
            .lock()
            .get(&issue_id)
            .cloned()
            .ok_or_else(|| IssueEngineError::UnknownIssue(issue_id.clone()))?;
        let request = ExecuteRequest {
            engine: context.engine,
            prompt,
            working_dir: context.working_dir,
            model: model.or(context.model),
            permission_mode: permission_mode.or(context.permission_mode),
        };
        let execution_id = self.execute_issue(issue_id, request).await?;
        Ok(FollowUpOutcome::Started { execution_id })
    }

    fn queue_follow_up(
        &self,
        issue_id: &IssueId,
        prompt: &str,
    ) -> Result<FollowUpOutcome, IssueEngineError> {
        let row = self
            .store
            .enqueue_pending(issue_id, prompt)
            .ok_or_else(|| IssueEngineError::Internal("pending enqueue failed".to_string()))?;

        // Surface the queued message to live subscribers; it is not a log
        // row until the next execution consumes it.
        let mut entry = NormalizedEntry::new(EntryType::UserMessage, prompt)
            .with_meta(meta::PENDING, true);
        entry.turn_index = self.store.next_turn_index(issue_id);
        self.emit_log(issue_id, entry);

        tracing::info!(issue_id = %issue_id, pending_id = %row.id, "queued follow-up message");
        Ok(FollowUpOutcome::Queued { pending_id: row.id })
    }

    /// Cancel the active execution, waiting for settlement.
    ///
    /// Idempotent: with nothing active it returns the persisted status
    /// without side effects.
    pub async fn cancel_issue(
        &self,
        issue_id: &IssueId,
    ) -> Result<Option<SessionStatus>, IssueEngineError> {
        let active = self.active.lock().get(issue_id).cloned();
        let Some(active) = active else {
            return Ok(self.store.session_status(issue_id));
        };

        tracing::info!(issue_id = %issue_id, execution_id = %active.execution_id, "cancelling execution");
        active.cancel_requested.store(true, Ordering::SeqCst);
        let executor = self.registry.get(active.engine)?;
        if let Err(e) = executor.cancel(&active.handle).await {
            tracing::warn!(error = %e, "executor cancel reported failure");
        }

        // Settlement releases the per-issue lock; taking it briefly makes
        // the final status visible before returning.
        let lock = self.issue_lock(issue_id);
        let _guard = lock.lock().await;
        Ok(self.store.session_status(issue_id))
    }

    /// Restart a failed or cancelled issue from its stored prompt.
    ///
    /// The only path that drops pending messages: they are marked
    /// dispatched without delivery.
    pub async fn restart_issue(
        self: &Arc<Self>,
        issue_id: IssueId,
    ) -> Result<ExecutionId, IssueEngineError> {
        let status = self.store.session_status(&issue_id);
        if !matches!(
            status,
            Some(SessionStatus::Failed) | Some(SessionStatus::Cancelled)
        ) {
            return Err(IssueEngineError::NotRestartable { issue_id, status });
        }

        let pending = self.store.pending_for(&issue_id);
        if !pending.is_empty() {
            let ids: Vec<MessageId> = pending.iter().map(|row: &PendingRow| row.id.clone()).collect();
            tracing::warn!(
                issue_id = %issue_id,
                discarded = ids.len(),
                "restart discards pending messages"
            );
            self.store.mark_dispatched(&ids);
        }

        let context = self
            .contexts
            .lock()
            .get(&issue_id)
            .cloned()
            .ok_or_else(|| IssueEngineError::UnknownIssue(issue_id.clone()))?;
        let request = ExecuteRequest {
            engine: context.engine,
            prompt: context.initial_prompt.clone(),
            working_dir: context.working_dir.clone(),
            model: context.model.clone(),
            permission_mode: context.permission_mode.clone(),
        };

        let guard = self.issue_lock(&issue_id).lock_owned().await;
        self.start_execution(issue_id, request, guard, SpawnMode::Fresh)
            .await
    }

    /// Fan hard cancels out across every active execution.
    pub async fn cancel_all(self: &Arc<Self>) {
        let issues: Vec<IssueId> = self.active.lock().keys().cloned().collect();
        let mut joins = Vec::new();
        for issue_id in issues {
            let engine = Arc::clone(self);
            joins.push(tokio::spawn(async move {
                if let Err(e) = engine.cancel_issue(&issue_id).await {
                    tracing::warn!(issue_id = %issue_id, error = %e, "cancel_all failed for issue");
                }
            }));
        }
        for join in joins {
            let _ = join.await;
        }
    }

    // ---- queries ----

    /// One page of logs, persisted rows merged with the live ring tail.
    pub fn get_logs(
        &self,
        issue_id: &IssueId,
        dev_mode: bool,
        options: &GetLogsOptions,
    ) -> Result<Vec<NormalizedEntry>, IssueEngineError> {
        self.dev_mode.lock().insert(issue_id.clone(), dev_mode);

        let limit = options.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        let cursor: Option<Cursor> = options
            .cursor
            .as_deref()
            .map(str::parse)
            .transpose()?;
        let before: Option<Cursor> = options
            .before
            .as_deref()
            .map(str::parse)
            .transpose()?;

        // Overfetch absorbs the second-stage visibility filter.
        let query = LogQuery {
            cursor,
            before,
            limit: limit.saturating_mul(2).saturating_add(1),
        };
        let mut page = self.store.logs_page(issue_id, dev_mode, &query);

        // Historical pages never mix with the live tail; keep the newest
        // `limit` rows, still ascending.
        if before.is_some() {
            let start = page.len().saturating_sub(limit);
            return Ok(page.split_off(start));
        }

        // More persisted rows remain: return the truncated page and let
        // the next cursor fetch the rest before any live-tail merge.
        let reached_end = page.len() <= limit;
        page.truncate(limit);
        if !reached_end {
            return Ok(page);
        }

        let ring_tail = self
            .active
            .lock()
            .get(issue_id)
            .map(|active| active.ring.lock().to_vec())
            .unwrap_or_default();
        Ok(merge_live_tail(
            page,
            ring_tail,
            dev_mode,
            cursor.is_some(),
            self.store.newest_message_id(issue_id),
        ))
    }

    pub fn has_active_process_for_issue(&self, issue_id: &IssueId) -> bool {
        self.active.lock().contains_key(issue_id)
    }

    pub fn is_turn_in_flight(&self, issue_id: &IssueId) -> bool {
        self.active
            .lock()
            .get(issue_id)
            .is_some_and(|active| active.handle.is_running())
    }

    /// Slash commands reported by the active execution's engine.
    pub fn slash_commands(&self, issue_id: &IssueId) -> Vec<String> {
        self.active
            .lock()
            .get(issue_id)
            .map(|active| active.slash_commands.get())
            .unwrap_or_default()
    }

    pub fn last_error(&self, issue_id: &IssueId) -> Option<String> {
        self.last_errors.lock().get(issue_id).cloned()
    }

    pub fn set_last_error(&self, issue_id: &IssueId, error: impl Into<String>) {
        self.last_errors.lock().insert(issue_id.clone(), error.into());
    }

    pub fn subscribe_log(&self, issue_id: Option<IssueId>) -> Subscription {
        self.bus.subscribe(EventKind::IssueLog, issue_id)
    }

    pub fn subscribe_state(&self, issue_id: Option<IssueId>) -> Subscription {
        self.bus.subscribe(EventKind::IssueStateChange, issue_id)
    }

    pub fn subscribe_settled(&self, issue_id: Option<IssueId>) -> Subscription {
        self.bus.subscribe(EventKind::IssueSettled, issue_id)
    }

    // ---- internals ----

    fn remember_context(&self, issue_id: &IssueId, request: &ExecuteRequest) {
        let mut contexts = self.contexts.lock();
        match contexts.get_mut(issue_id) {
            Some(context) => {
                context.engine = request.engine;
                context.working_dir = request.working_dir.clone();
                context.model = request.model.clone();
                context.permission_mode = request.permission_mode.clone();
            }
            None => {
                contexts.insert(
                    issue_id.clone(),
                    IssueContext {
                        engine: request.engine,
                        initial_prompt: request.prompt.clone(),
                        working_dir: request.working_dir.clone(),
                        model: request.model.clone(),
                        permission_mode: request.permission_mode.clone(),
                    },
                );
            }
        }
    }

    fn set_status(
        &self,
        issue_id: &IssueId,
        execution_id: &ExecutionId,
        status: SessionStatus,
        error: Option<String>,
    ) {
        let current = self.store.session_status(issue_id);
        if !SessionStatus::can_transition(current, status) {
            tracing::warn!(
                issue_id = %issue_id,
                from = ?current,
                to = %status,
                "unexpected session status transition"
            );
        }
        self.store.set_session_status(issue_id, status, error.clone());
        self.bus.emit(&EngineEvent::IssueStateChange {
            issue_id: issue_id.clone(),
            execution_id: execution_id.clone(),
            status,
            error,
        });
        self.bus.emit(&EngineEvent::IssueUpdated {
            issue_id: issue_id.clone(),
        });
    }

    fn emit_log(&self, issue_id: &IssueId, entry: NormalizedEntry) {
        let dev_mode = self
            .dev_mode
            .lock()
            .get(issue_id)
            .copied()
            .unwrap_or(true);
        if !is_visible_for_mode(&entry, dev_mode) {
            return;
        }
        self.bus.emit(&EngineEvent::IssueLog {
            issue_id: issue_id.clone(),
            entry,
        });
    }

    /// Spawn the engine and hand everything to the reader loop.
    async fn start_execution(
        self: &Arc<Self>,
        issue_id: IssueId,
        request: ExecuteRequest,
        guard: OwnedMutexGuard<()>,
        mode: SpawnMode,
    ) -> Result<ExecutionId, IssueEngineError> {
        let execution_id = ExecutionId::generate();
        let executor = self.registry.get(request.engine)?;

        if !self.pm.has_capacity(EXECUTION_GROUP) {
            return Err(IssueEngineError::SessionLimitReached);
        }

        // Pending messages ride along; their ids dispatch only on success.
        let pending = self.store.pending_for(&issue_id);
        let (effective_prompt, pending_ids) = collect_pending(&request.prompt, &pending);

        let turn_index = self.store.next_turn_index(&issue_id);

        // The turn's user-message row sits at entry 0.
        let user_entry = NormalizedEntry::new(EntryType::UserMessage, &effective_prompt);
        let persisted_user = self.store.persist_log_entry(
            &issue_id,
            &execution_id,
            &user_entry,
            turn_index,
            0,
            None,
        );
        let user_message_id = persisted_user
            .as_ref()
            .and_then(|entry| entry.message_id.clone());
        let live_user = persisted_user.unwrap_or_else(|| {
            let mut fallback = user_entry.clone();
            fallback.turn_index = turn_index;
            fallback
        });
        self.emit_log(&issue_id, live_user);

        self.set_status(&issue_id, &execution_id, SessionStatus::Pending, None);

        let external = match mode {
            SpawnMode::Fresh => None,
            SpawnMode::Auto => self.store.external_session_id(&issue_id),
        };
        let opts = SpawnOptions {
            issue_id: issue_id.clone(),
            execution_id: execution_id.clone(),
            prompt: effective_prompt,
            working_dir: request.working_dir.clone(),
            model: request.model.clone(),
            permission_mode: request.permission_mode.clone(),
            external_session_id: external.clone(),
        };

        let spawn_result = if external.is_some() {
            match executor.spawn_follow_up(&opts).await {
                Err(EngineError::MissingExternalSessionId) => {
                    tracing::warn!(issue_id = %issue_id, "stale external session id, spawning fresh");
                    executor.spawn(&opts).await
                }
                other => other,
            }
        } else {
            executor.spawn(&opts).await
        };

        let spawned = match spawn_result {
            Ok(spawned) => spawned,
            Err(e) => {
                let message = e.to_string();
                self.set_last_error(&issue_id, message.clone());
                self.set_status(
                    &issue_id,
                    &execution_id,
                    SessionStatus::Failed,
                    Some(message),
                );
                return Err(e.into());
            }
        };

        if let Some(external_id) = &spawned.external_session_id {
            self.store.set_external_session_id(&issue_id, external_id);
        }

        if let Err(e) = self.pm.register(
            execution_id.clone(),
            issue_id.clone(),
            spawned.handle.clone(),
            EXECUTION_GROUP,
        ) {
            let _ = executor.cancel(&spawned.handle).await;
            let message = e.to_string();
            self.set_status(
                &issue_id,
                &execution_id,
                SessionStatus::Failed,
                Some(message),
            );
            return Err(match e {
                ProcessManagerError::SessionLimitReached { .. } => {
                    IssueEngineError::SessionLimitReached
                }
                other => IssueEngineError::Internal(other.to_string()),
            });
        }

        let ring = Arc::new(Mutex::new(RingBuffer::new(self.config.limits.ring_capacity)));
        let cancel_requested = Arc::new(AtomicBool::new(false));
        self.active.lock().insert(
            issue_id.clone(),
            ActiveExecution {
                execution_id: execution_id.clone(),
                engine: request.engine,
                handle: spawned.handle.clone(),
                slash_commands: spawned.slash_commands.clone(),
                ring: Arc::clone(&ring),
                cancel_requested: Arc::clone(&cancel_requested),
            },
        );

        self.set_status(&issue_id, &execution_id, SessionStatus::Running, None);

        let reader = ReaderTask {
            engine: Arc::clone(self),
            issue_id,
            execution_id: execution_id.clone(),
            normalizer: executor.normalizer(),
            turn_index,
            user_message_id,
            pending_ids,
            ring,
            cancel_requested,
            guard,
        };
        tokio::spawn(reader.run(spawned));

        Ok(execution_id)
    }
}

/// Everything one execution's reader loop needs.
struct ReaderTask {
    engine: Arc<IssueEngine>,
    issue_id: IssueId,
    execution_id: ExecutionId,
    normalizer: Box<dyn LogNormalizer>,
    turn_index: u32,
    user_message_id: Option<MessageId>,
    pending_ids: Vec<MessageId>,
    ring: Arc<Mutex<RingBuffer<NormalizedEntry>>>,
    cancel_requested: Arc<AtomicBool>,
    guard: OwnedMutexGuard<()>,
}

impl ReaderTask {
    /// Pump normalized entries until EOF, then settle the execution.
    async fn run(mut self, spawned: SpawnedProcess) {
        let SpawnedProcess {
            mut lines,
            exit,
            stderr,
            ..
        } = spawned;

        // Entry 0 of the turn is the user message.
        let mut entry_counter: u32 = 1;
        let mut saw_error = false;

        while let Some(line) = lines.recv().await {
            for entry in self.normalizer.parse(&line) {
                let entry_index = entry_counter;
                entry_counter += 1;

                if entry.entry_type == EntryType::ErrorMessage {
                    saw_error = true;
                }

                let persisted = self.engine.store.persist_log_entry(
                    &self.issue_id,
                    &self.execution_id,
                    &entry,
                    self.turn_index,
                    entry_index,
                    self.user_message_id.clone(),
                );
                // Persist failure still delivers the live entry.
                let record = persisted.unwrap_or_else(|| {
                    let mut live = entry.clone();
                    live.turn_index = self.turn_index;
                    live.entry_index = entry_index;
                    live.reply_to = self.user_message_id.clone();
                    live
                });
                if record.entry_type == EntryType::ToolUse {
                    self.engine
                        .store
                        .persist_tool_detail(&self.issue_id, &record);
                }

                self.ring.lock().append(record.clone());
                self.engine.emit_log(&self.issue_id, record);
            }
        }

        let exit_code = exit.await.unwrap_or(None);
        self.settle(exit_code, saw_error, &stderr).await;
    }

    async fn settle(self, exit_code: Option<i32>, saw_error: bool, stderr: &StderrTail) {
        let engine = &self.engine;

        // Defensive drain: re-persist anything that missed persistence.
        for entry in self.ring.lock().to_vec() {
            if entry.message_id.is_none() {
                engine.store.persist_log_entry(
                    &self.issue_id,
                    &self.execution_id,
                    &entry,
                    entry.turn_index,
                    entry.entry_index,
                    entry.reply_to.clone(),
                );
            }
        }

        let cancelled = self.cancel_requested.load(Ordering::SeqCst);
        let status = if cancelled {
            SessionStatus::Cancelled
        } else if exit_code == Some(0) && !saw_error {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };

        // At-most-once dispatch: only a successful call consumes them.
        if status == SessionStatus::Completed {
            engine.store.mark_dispatched(&self.pending_ids);
        }

        let error = if status == SessionStatus::Failed {
            let tail = stderr.tail();
            let message = if tail.trim().is_empty() {
                match exit_code {
                    Some(code) => format!("exit code {code}"),
                    None => "killed by signal".to_string(),
                }
            } else {
                tail
            };
            engine.set_last_error(&self.issue_id, message.clone());
            Some(message)
        } else {
            None
        };

        tracing::info!(
            issue_id = %self.issue_id,
            execution_id = %self.execution_id,
            status = %status,
            exit_code = ?exit_code,
            "execution settled"
        );

        engine.set_status(&self.issue_id, &self.execution_id, status, error);
        engine.bus.emit(&EngineEvent::IssueSettled {
            issue_id: self.issue_id.clone(),
            execution_id: self.execution_id.clone(),
            status,
        });

        if let Err(e) = engine.store.flush() {
            tracing::warn!(error = %e, "flush at settlement failed");
        }

        engine.active.lock().remove(&self.issue_id);
        engine.pm.notify_exit(&self.execution_id, exit_code);
        drop(self.guard);
    }
}

/// Merge the live ring tail into a persisted page.
///
/// Dedupes by `message_id` (falling back to the entry's identity key),
/// applies the forward-mode lower bound, and returns ascending by id
/// with unpersisted entries at the end in insertion order.
fn merge_live_tail(
    page: Vec<NormalizedEntry>,
    ring_tail: Vec<NormalizedEntry>,
    dev_mode: bool,
    forward_mode: bool,
    newest_db_id: Option<MessageId>,
) -> Vec<NormalizedEntry> {
    use std::collections::HashSet;

    let seen_ids: HashSet<MessageId> = page
        .iter()
        .filter_map(|entry| entry.message_id.clone())
        .collect();
    let seen_keys: HashSet<(u32, Option<String>, EntryType, String)> = page
        .iter()
        .map(owned_dedupe_key)
        .collect();

    let bound = if forward_mode {
        page.iter()
            .filter_map(|entry| entry.message_id.clone())
            .max()
            .or(newest_db_id)
    } else {
        None
    };

    let mut merged = page;
    for entry in ring_tail {
        if !is_visible_for_mode(&entry, dev_mode) {
            continue;
        }
        match &entry.message_id {
            Some(id) => {
                if seen_ids.contains(id) {
                    continue;
                }
                if let Some(bound) = &bound {
                    if id <= bound {
                        continue;
                    }
                }
            }
            None => {
                if seen_keys.contains(&owned_dedupe_key(&entry)) {
                    continue;
                }
            }
        }
        merged.push(entry);
    }

    // Stable sort: entries without an id keep insertion order at the end.
    merged.sort_by(|a, b| match (&a.message_id, &b.message_id) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    merged
}

fn owned_dedupe_key(entry: &NormalizedEntry) -> (u32, Option<String>, EntryType, String) {
    (
        entry.turn_index,
        entry.timestamp.clone(),
        entry.entry_type,
        entry.content.clone(),
    )
}

#[cfg(test)]
#[path = "issue_engine_tests.rs"]
mod tests;
