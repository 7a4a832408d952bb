// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted fake engine for tests.
//!
//! Emits a configured stdout script through the normal [`SpawnedProcess`]
//! surface and records every call so tests can assert on executor usage
//! without spawning real binaries. Speaks the streaming-JSON dialect, so
//! the Claude normalizer applies.

use super::claude_normalize::ClaudeNormalizer;
use super::{
    EngineError, EngineExecutor, LogNormalizer, ProcessControl, ProcessHandle,
    SharedSlashCommands, SpawnOptions, SpawnedProcess, StderrTail,
};
use async_trait::async_trait;
use ov_core::{AuthStatus, EngineAvailability, EngineKind, ModelInfo};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// One recorded interaction with the fake.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeCall {
    Spawn { prompt: String },
    FollowUp { prompt: String, external_session_id: String },
    UserMessage(String),
    Interrupt,
    Kill,
}

/// Behavior knobs for the fake engine.
#[derive(Debug, Clone)]
pub struct FakeEngineConfig {
    pub kind: EngineKind,
    /// Stdout lines emitted after spawn, in order.
    pub script: Vec<String>,
    /// Exit code sent once the script drains. `None` keeps the child
    /// "running" until an interrupt or kill arrives.
    pub exit_code: Option<i32>,
    /// Ignore soft interrupts (forces the hard-kill path).
    pub ignore_interrupt: bool,
    /// Fail `spawn`/`spawn_follow_up` with this message.
    pub fail_spawn: Option<String>,
}

impl Default for FakeEngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Claude,
            script: Vec::new(),
            exit_code: Some(0),
            ignore_interrupt: false,
            fail_spawn: None,
        }
    }
}

/// Scripted engine executor.
#[derive(Clone, Default)]
pub struct FakeEngine {
    config: Arc<Mutex<FakeEngineConfig>>,
    calls: Arc<Mutex<Vec<FakeCall>>>,
}

impl FakeEngine {
    pub fn new(config: FakeEngineConfig) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fake that emits `lines` and exits 0.
    pub fn with_script<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(FakeEngineConfig {
            script: lines.into_iter().map(Into::into).collect(),
            ..FakeEngineConfig::default()
        })
    }

    /// Replace the script used by the next spawn.
    pub fn set_script<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.lock().script = lines.into_iter().map(Into::into).collect();
    }

    pub fn set_exit_code(&self, code: Option<i32>) {
        self.config.lock().exit_code = code;
    }

    pub fn set_ignore_interrupt(&self, ignore: bool) {
        self.config.lock().ignore_interrupt = ignore;
    }

    pub fn set_fail_spawn(&self, message: Option<String>) {
        self.config.lock().fail_spawn = message;
    }

    /// Everything recorded so far.
    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: FakeCall) {
        self.calls.lock().push(call);
    }

    fn launch(&self, external_session_id: String) -> SpawnedProcess {
        let config = self.config.lock().clone();
        let (lines_tx, lines_rx) = mpsc::channel(256);
        let (exit_tx, exit_rx) = oneshot::channel();
        let running = Arc::new(AtomicBool::new(true));

        let control = Arc::new(FakeControl {
            calls: Arc::clone(&self.calls),
            running: Arc::clone(&running),
            ignore_interrupt: config.ignore_interrupt,
            finisher: Mutex::new(Some(Finisher {
                exit_tx,
                lines_tx: lines_tx.clone(),
            })),
        });

        let script = config.script.clone();
        let exit_code = config.exit_code;
        let script_control = Arc::clone(&control);
        tokio::spawn(async move {
            for line in script {
                if lines_tx.send(line).await.is_err() {
                    return;
                }
            }
            drop(lines_tx);
            if let Some(code) = exit_code {
                script_control.finish(Some(code));
            }
        });

        SpawnedProcess {
            execution_id: ov_core::ExecutionId::generate(),
            lines: lines_rx,
            exit: exit_rx,
            handle: ProcessHandle::new(control),
            external_session_id: Some(external_session_id),
            slash_commands: SharedSlashCommands::default(),
            stderr: StderrTail::default(),
        }
    }
}

struct Finisher {
    exit_tx: oneshot::Sender<Option<i32>>,
    lines_tx: mpsc::Sender<String>,
}

struct FakeControl {
    calls: Arc<Mutex<Vec<FakeCall>>>,
    running: Arc<AtomicBool>,
    ignore_interrupt: bool,
    finisher: Mutex<Option<Finisher>>,
}

impl FakeControl {
    fn finish(&self, code: Option<i32>) {
        if let Some(finisher) = self.finisher.lock().take() {
            self.running.store(false, Ordering::SeqCst);
            drop(finisher.lines_tx);
            let _ = finisher.exit_tx.send(code);
        }
    }
}

#[async_trait]
impl ProcessControl for FakeControl {
    async fn send_user_message(&self, text: &str) -> Result<(), EngineError> {
        self.calls.lock().push(FakeCall::UserMessage(text.to_string()));
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), EngineError> {
        self.calls.lock().push(FakeCall::Interrupt);
        if !self.ignore_interrupt {
            self.finish(None);
        }
        Ok(())
    }

    async fn close(&self) {}

    async fn kill(&self) {
        self.calls.lock().push(FakeCall::Kill);
        self.finish(None);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineExecutor for FakeEngine {
    fn kind(&self) -> EngineKind {
        self.config.lock().kind
    }

    async fn spawn(&self, opts: &SpawnOptions) -> Result<SpawnedProcess, EngineError> {
        if let Some(message) = self.config.lock().fail_spawn.clone() {
            return Err(EngineError::SpawnFailed(message));
        }
        self.record(FakeCall::Spawn {
            prompt: opts.prompt.clone(),
        });
        Ok(self.launch(format!("fake-session-{}", opts.execution_id.short(8))))
    }

    async fn spawn_follow_up(&self, opts: &SpawnOptions) -> Result<SpawnedProcess, EngineError> {
        let external = opts
            .external_session_id
            .clone()
            .ok_or(EngineError::MissingExternalSessionId)?;
        if let Some(message) = self.config.lock().fail_spawn.clone() {
            return Err(EngineError::SpawnFailed(message));
        }
        self.record(FakeCall::FollowUp {
            prompt: opts.prompt.clone(),
            external_session_id: external.clone(),
        });
        Ok(self.launch(external))
    }

    async fn availability(&self) -> EngineAvailability {
        EngineAvailability {
            engine: self.kind(),
            installed: true,
            version: Some("fake-1.0".to_string()),
            binary_path: None,
            auth_status: AuthStatus::Authenticated,
            error: None,
        }
    }

    async fn models(&self) -> Result<Vec<ModelInfo>, EngineError> {
        Ok(vec![ModelInfo {
            id: "fake-model".to_string(),
            display_name: "Fake Model".to_string(),
            default: true,
        }])
    }

    fn normalizer(&self) -> Box<dyn LogNormalizer> {
        Box::new(ClaudeNormalizer::new(Vec::new()))
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
