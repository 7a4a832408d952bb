// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine executor abstraction.
//!
//! The `EngineExecutor` trait encapsulates all engine-specific logic:
//! command construction, the stdio protocol, interrupt semantics, and
//! log normalization. The issue engine only ever sees [`SpawnedProcess`]
//! and [`ProcessHandle`].
//!
//! # Ownership
//!
//! The spawned child is owned by a supervisor task; the [`ProcessHandle`]
//! holds the soft-interrupt path (protocol-level) and the hard-kill switch
//! (supervisor-level). The filtered stdout line stream and the exit
//! receiver go to the caller's reader loop.

pub mod claude;
mod claude_normalize;
mod claude_protocol;
pub mod codex;
mod codex_normalize;
mod codex_rpc;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use claude_normalize::ClaudeNormalizer;
pub use claude_protocol::control_response_for;
pub use codex_normalize::CodexNormalizer;

use crate::command::CommandSpec;
use async_trait::async_trait;
use ov_core::{
    EngineAvailability, EngineKind, ExecutionId, IssueId, ModelInfo, NormalizedEntry,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

/// Default grace between soft interrupt and hard kill.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// Default budget for one availability probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("follow-up requested without an external session id")]
    MissingExternalSessionId,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("stdin closed")]
    Closed,
    #[error("{method} timed out after {timeout_ms}ms")]
    RpcTimeout { method: String, timeout_ms: u64 },
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("unknown engine: {0}")]
    UnknownEngine(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Options for spawning one execution.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub issue_id: IssueId,
    pub execution_id: ExecutionId,
    pub prompt: String,
    pub working_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    /// Required for `spawn_follow_up`; ignored by `spawn`.
    pub external_session_id: Option<String>,
}

/// Stateful per-execution normalizer: one raw line in, zero or more
/// entries out. Total: never panics, never errors.
pub trait LogNormalizer: Send {
    fn parse(&mut self, line: &str) -> Vec<NormalizedEntry>;
}

/// Protocol-level control surface over one child.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Inject a user message into the running session.
    async fn send_user_message(&self, text: &str) -> Result<(), EngineError>;

    /// Protocol-level soft interrupt. Best effort.
    async fn interrupt(&self) -> Result<(), EngineError>;

    /// Close stdin. Idempotent.
    async fn close(&self);

    /// Hard-kill the child via the supervisor.
    async fn kill(&self);

    fn is_running(&self) -> bool;
}

/// Clonable handle over a child's control surface.
#[derive(Clone)]
pub struct ProcessHandle(Arc<dyn ProcessControl>);

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle").finish_non_exhaustive()
    }
}

impl ProcessHandle {
    pub fn new(control: Arc<dyn ProcessControl>) -> Self {
        Self(control)
    }

    pub async fn send_user_message(&self, text: &str) -> Result<(), EngineError> {
        self.0.send_user_message(text).await
    }

    pub async fn interrupt(&self) -> Result<(), EngineError> {
        self.0.interrupt().await
    }

    pub async fn close(&self) {
        self.0.close().await
    }

    pub async fn kill(&self) {
        self.0.kill().await
    }

    pub fn is_running(&self) -> bool {
        self.0.is_running()
    }
}

/// Bounded tail of the child's stderr, for `last_error` reporting.
#[derive(Clone, Default, Debug)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

/// Lines of stderr kept for diagnostics.
const STDERR_TAIL_LINES: usize = 40;

impl StderrTail {
    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The retained tail, newline-joined.
    pub fn tail(&self) -> String {
        let lines = self.lines.lock();
        lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Slash commands reported by the engine during session init.
#[derive(Clone, Default, Debug)]
pub struct SharedSlashCommands {
    commands: Arc<Mutex<Vec<String>>>,
}

impl SharedSlashCommands {
    pub fn set(&self, commands: Vec<String>) {
        *self.commands.lock() = commands;
    }

    pub fn get(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

/// A spawned execution, as handed to the issue engine.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub execution_id: ExecutionId,
    /// Filtered stdout: protocol control traffic never appears here.
    pub lines: mpsc::Receiver<String>,
    /// Resolves with the exit code when the child terminates
    /// (`None` = killed by signal).
    pub exit: oneshot::Receiver<Option<i32>>,
    pub handle: ProcessHandle,
    /// Engine-side session id for resuming follow-up turns.
    pub external_session_id: Option<String>,
    pub slash_commands: SharedSlashCommands,
    pub stderr: StderrTail,
}

/// One executor per engine CLI.
#[async_trait]
pub trait EngineExecutor: Send + Sync + 'static {
    fn kind(&self) -> EngineKind;

    /// Launch a fresh session and send the initial prompt.
    async fn spawn(&self, opts: &SpawnOptions) -> Result<SpawnedProcess, EngineError>;

    /// Resume the session identified by `opts.external_session_id`.
    ///
    /// Fails with [`EngineError::MissingExternalSessionId`] when the id is
    /// absent so the caller can fall back to a fresh spawn.
    async fn spawn_follow_up(&self, opts: &SpawnOptions) -> Result<SpawnedProcess, EngineError>;

    /// Graceful cancel: protocol interrupt, then hard kill after the grace
    /// period if the child is still running.
    async fn cancel(&self, handle: &ProcessHandle) -> Result<(), EngineError> {
        cancel_with_grace(handle, kill_grace()).await;
        Ok(())
    }

    /// Probe whether the engine CLI is installed and authenticated.
    async fn availability(&self) -> EngineAvailability;

    /// Models selectable for this engine.
    async fn models(&self) -> Result<Vec<ModelInfo>, EngineError>;

    /// Fresh normalizer for one execution's log stream.
    fn normalizer(&self) -> Box<dyn LogNormalizer>;
}

/// Effective soft-cancel grace (env override wins).
pub(crate) fn kill_grace() -> Duration {
    crate::env::kill_grace_override().unwrap_or(KILL_GRACE)
}

/// Soft interrupt, bounded wait, then hard kill; finally close stdin.
pub async fn cancel_with_grace(handle: &ProcessHandle, grace: Duration) {
    if handle.is_running() {
        if let Err(e) = handle.interrupt().await {
            tracing::debug!(error = %e, "interrupt failed, falling through to kill");
        }
        let poll = Duration::from_millis(100);
        let deadline = tokio::time::Instant::now() + grace;
        while handle.is_running() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(poll).await;
        }
        if handle.is_running() {
            tracing::warn!("child ignored interrupt, sending hard kill");
            handle.kill().await;
        }
    }
    handle.close().await;
}

/// Shared stdin writer: newline-framed, lockable, closable.
#[derive(Clone)]
pub(crate) struct LineWriter {
    stdin: Arc<tokio::sync::Mutex<Option<tokio::process::ChildStdin>>>,
}

impl LineWriter {
    pub(crate) fn new(stdin: tokio::process::ChildStdin) -> Self {
        Self {
            stdin: Arc::new(tokio::sync::Mutex::new(Some(stdin))),
        }
    }

    /// Write one line and flush. [`EngineError::Closed`] after `close`.
    pub(crate) async fn write_line(&self, line: &str) -> Result<(), EngineError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(EngineError::Closed)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Drop the stdin handle, signalling EOF to the child. Idempotent.
    pub(crate) async fn close(&self) {
        self.stdin.lock().await.take();
    }
}

/// Switch flipping the supervisor into the kill path.
#[derive(Clone)]
pub(crate) struct KillSwitch {
    tx: mpsc::Sender<()>,
}

impl KillSwitch {
    pub(crate) async fn kill(&self) {
        let _ = self.tx.send(()).await;
    }
}

/// A spawned child with its pipes split out and a supervisor task owning
/// the `Child` itself.
pub(crate) struct SupervisedChild {
    pub stdin: tokio::process::ChildStdin,
    pub stdout: tokio::process::ChildStdout,
    pub stderr: tokio::process::ChildStderr,
    pub kill: KillSwitch,
    pub running: Arc<AtomicBool>,
    pub exit: oneshot::Receiver<Option<i32>>,
}

/// Spawn a child from a spec and hand its lifetime to a supervisor task.
pub(crate) fn spawn_supervised(spec: &CommandSpec) -> Result<SupervisedChild, EngineError> {
    let mut child = spec
        .to_command()
        .spawn()
        .map_err(|e| EngineError::SpawnFailed(format!("{}: {e}", spec.program)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| EngineError::SpawnFailed("stdin not piped".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EngineError::SpawnFailed("stdout not piped".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| EngineError::SpawnFailed("stderr not piped".to_string()))?;

    let (exit_tx, exit_rx) = oneshot::channel();
    let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
    let running = Arc::new(AtomicBool::new(true));
    let running_flag = Arc::clone(&running);

    tokio::spawn(async move {
        let code = tokio::select! {
            status = child.wait() => status.ok().and_then(|s| s.code()),
            _ = kill_rx.recv() => {
                let _ = child.start_kill();
                child.wait().await.ok().and_then(|s| s.code())
            }
        };
        running_flag.store(false, Ordering::SeqCst);
        let _ = exit_tx.send(code);
    });

    Ok(SupervisedChild {
        stdin,
        stdout,
        stderr,
        kill: KillSwitch { tx: kill_tx },
        running,
        exit: exit_rx,
    })
}

/// Stream stderr lines into the bounded tail.
pub(crate) fn drain_stderr(stderr: tokio::process::ChildStderr, tail: StderrTail) {
    use tokio::io::AsyncBufReadExt;
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tail.push(line);
        }
    });
}

/// Registry mapping engine tags to executors.
pub struct EngineRegistry {
    executors: HashMap<EngineKind, Arc<dyn EngineExecutor>>,
}

impl EngineRegistry {
    /// Registry with the standard engines, sharing one config.
    pub fn new(config: Arc<ov_core::Config>) -> Self {
        let mut executors: HashMap<EngineKind, Arc<dyn EngineExecutor>> = HashMap::new();
        executors.insert(
            EngineKind::Claude,
            Arc::new(claude::ClaudeExecutor::new(Arc::clone(&config))),
        );
        executors.insert(EngineKind::Codex, Arc::new(codex::CodexExecutor::new(config)));
        Self { executors }
    }

    /// Replace an engine's executor (used to inject fakes in tests).
    pub fn with_executor(mut self, executor: Arc<dyn EngineExecutor>) -> Self {
        self.executors.insert(executor.kind(), executor);
        self
    }

    pub fn get(&self, kind: EngineKind) -> Result<Arc<dyn EngineExecutor>, EngineError> {
        self.executors
            .get(&kind)
            .cloned()
            .ok_or_else(|| EngineError::UnknownEngine(kind.to_string()))
    }

    /// Probe all engines concurrently.
    pub async fn available(&self) -> Vec<EngineAvailability> {
        let mut join_set = tokio::task::JoinSet::new();
        for kind in EngineKind::all() {
            if let Some(executor) = self.executors.get(kind).cloned() {
                let kind = *kind;
                join_set.spawn(async move {
                    match tokio::time::timeout(probe_timeout(), executor.availability()).await {
                        Ok(avail) => avail,
                        Err(_) => EngineAvailability::not_installed(kind, "probe timed out"),
                    }
                });
            }
        }

        let mut results = Vec::new();
        while let Some(res) = join_set.join_next().await {
            if let Ok(avail) = res {
                results.push(avail);
            }
        }
        results.sort_by_key(|a| a.engine.as_str());
        results
    }
}

fn probe_timeout() -> Duration {
    crate::env::probe_timeout_override().unwrap_or(PROBE_TIMEOUT)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
