// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed registry of running children.
//!
//! The process manager owns the hard-kill path and the GC loop; the
//! protocol handler owns the soft interrupt. Registration enforces the
//! per-group concurrency cap.

use ov_adapters::{cancel_with_grace, ProcessHandle};
use ov_core::{ExecutionId, IssueId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Group name for engine executions.
pub const EXECUTION_GROUP: &str = "execution";

/// Errors from process-manager operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessManagerError {
    #[error("session_limit_reached")]
    SessionLimitReached { group: String },
    #[error("already registered: {0}")]
    AlreadyRegistered(ExecutionId),
}

/// One registered child.
#[derive(Clone)]
pub struct ManagedProcess {
    pub id: ExecutionId,
    pub issue_id: IssueId,
    pub group: String,
    pub handle: ProcessHandle,
    pub started_at: Instant,
}

type ExitHook = Arc<dyn Fn(&ManagedProcess, Option<i32>) + Send + Sync>;

struct Inner {
    entries: HashMap<ExecutionId, ManagedProcess>,
    exit_hooks: Vec<ExitHook>,
}

/// Registry of running children with concurrency caps and GC.
#[derive(Clone)]
pub struct ProcessManager {
    inner: Arc<Mutex<Inner>>,
    max_per_group: usize,
    kill_grace: Duration,
}

impl ProcessManager {
    pub fn new(max_per_group: usize, kill_grace: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                exit_hooks: Vec::new(),
            })),
            max_per_group: max_per_group.max(1),
            kill_grace,
        }
    }

    /// Register a child. Fails when the group is at its cap.
    pub fn register(
        &self,
        id: ExecutionId,
        issue_id: IssueId,
        handle: ProcessHandle,
        group: &str,
    ) -> Result<(), ProcessManagerError> {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&id) {
            return Err(ProcessManagerError::AlreadyRegistered(id));
        }
        let in_group = inner.entries.values().filter(|p| p.group == group).count();
        if in_group >= self.max_per_group {
            return Err(ProcessManagerError::SessionLimitReached {
                group: group.to_string(),
            });
        }
        inner.entries.insert(
            id.clone(),
            ManagedProcess {
                id,
                issue_id,
                group: group.to_string(),
                handle,
                started_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Whether the group has room for one more child.
    pub fn has_capacity(&self, group: &str) -> bool {
        let inner = self.inner.lock();
        inner.entries.values().filter(|p| p.group == group).count() < self.max_per_group
    }

    pub fn get(&self, id: &ExecutionId) -> Option<ManagedProcess> {
        self.inner.lock().entries.get(id).cloned()
    }

    pub fn has(&self, id: &ExecutionId) -> bool {
        self.inner.lock().entries.contains_key(id)
    }

    /// Snapshot of all registered children.
    pub fn active(&self) -> Vec<ManagedProcess> {
        self.inner.lock().entries.values().cloned().collect()
    }

    pub fn active_in_group(&self, group: &str) -> Vec<ManagedProcess> {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|p| p.group == group)
            .cloned()
            .collect()
    }

    pub fn active_for_issue(&self, issue_id: &IssueId) -> Option<ManagedProcess> {
        self.inner
            .lock()
            .entries
            .values()
            .find(|p| &p.issue_id == issue_id)
            .cloned()
    }

    pub fn remove(&self, id: &ExecutionId) -> Option<ManagedProcess> {
        self.inner.lock().entries.remove(id)
    }

    /// Terminate then kill after the grace period; entry stays registered
    /// until [`ProcessManager::notify_exit`] or [`ProcessManager::remove`].
    pub async fn force_kill(&self, id: &ExecutionId) {
        let Some(process) = self.get(id) else {
            return;
        };
        cancel_with_grace(&process.handle, self.kill_grace).await;
    }

    /// Register a callback fired when a child's exit is observed.
    pub fn on_exit<F>(&self, hook: F)
    where
        F: Fn(&ManagedProcess, Option<i32>) + Send + Sync + 'static,
    {
        self.inner.lock().exit_hooks.push(Arc::new(hook));
    }

    /// Record an observed exit: fires hooks and removes the entry.
    pub fn notify_exit(&self, id: &ExecutionId, exit_code: Option<i32>) {
        // Hooks may re-enter the manager; call them outside the lock.
        let (process, hooks) = {
            let inner = self.inner.lock();
            (inner.entries.get(id).cloned(), inner.exit_hooks.clone())
        };
        let Some(process) = process else {
            return;
        };
        for hook in hooks {
            hook(&process, exit_code);
        }
        self.remove(id);
    }

    /// Start the periodic GC loop: removes corpses (no longer running)
    /// older than `max_age`. Returns the task handle; aborting it stops
    /// the loop.
    pub fn start_gc(&self, interval: Duration, max_age: Duration) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                manager.collect_garbage(max_age);
            }
        })
    }

    /// One GC sweep (exposed for tests).
    pub fn collect_garbage(&self, max_age: Duration) {
        let stale: Vec<ExecutionId> = {
            let inner = self.inner.lock();
            inner
                .entries
                .values()
                .filter(|p| !p.handle.is_running() && p.started_at.elapsed() > max_age)
                .map(|p| p.id.clone())
                .collect()
        };
        for id in stale {
            tracing::warn!(execution_id = %id, "GC removing dead registry entry");
            self.remove(&id);
        }
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
