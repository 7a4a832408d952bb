// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor for the JSON-RPC engine (Codex CLI in app-server mode).
//!
//! Explicit handshake: `initialize` → `initialized` → `newThread` /
//! `resumeThread` → `startTurn`. The thread id is exported as the
//! execution's external session id so follow-up turns resume the same
//! thread.

use super::codex_normalize::CodexNormalizer;
use super::codex_rpc::RpcClient;
use super::{
    drain_stderr, spawn_supervised, EngineError, EngineExecutor, KillSwitch, LineWriter,
    LogNormalizer, ProcessControl, ProcessHandle, SharedSlashCommands, SpawnOptions,
    SpawnedProcess, StderrTail,
};
use crate::command::{safe_env, CommandSpec};
use crate::subprocess::{find_in_path, run_with_timeout};
use async_trait::async_trait;
use ov_core::{AuthStatus, Config, EngineAvailability, EngineKind, ModelInfo};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Executor for the Codex app-server.
pub struct CodexExecutor {
    config: Arc<Config>,
}

impl CodexExecutor {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn rpc_timeout(&self) -> Duration {
        crate::env::rpc_timeout_override()
            .unwrap_or_else(|| Duration::from_millis(self.config.limits.rpc_timeout_ms))
    }

    fn build_spec(&self, opts: &SpawnOptions) -> CommandSpec {
        CommandSpec::new(&self.config.codex.program)
            .args(self.config.codex.args.iter().cloned())
            .env(safe_env(&self.config, &[]))
            .cwd(opts.working_dir.clone())
    }

    async fn launch(
        &self,
        opts: &SpawnOptions,
        resume: Option<String>,
    ) -> Result<SpawnedProcess, EngineError> {
        let spec = self.build_spec(opts);
        tracing::debug!(
            issue_id = %opts.issue_id,
            execution_id = %opts.execution_id,
            program = %spec.program,
            resume = resume.is_some(),
            "spawning codex app-server"
        );

        let child = spawn_supervised(&spec)?;
        let writer = LineWriter::new(child.stdin);
        let (rpc, lines) = RpcClient::start(writer.clone(), child.stdout, self.rpc_timeout());

        let stderr = StderrTail::default();
        drain_stderr(child.stderr, stderr.clone());

        let handshake = self
            .handshake(&rpc, opts, resume.as_deref())
            .await;
        let (thread_id, turn_id) = match handshake {
            Ok(ids) => ids,
            Err(e) => {
                // Don't leave a half-initialized child behind.
                child.kill.kill().await;
                return Err(e);
            }
        };

        let control = CodexControl {
            rpc,
            writer,
            thread_id: thread_id.clone(),
            current_turn: Arc::new(Mutex::new(turn_id)),
            kill: child.kill,
            running: child.running,
        };

        Ok(SpawnedProcess {
            execution_id: opts.execution_id.clone(),
            lines,
            exit: child.exit,
            handle: ProcessHandle::new(Arc::new(control)),
            external_session_id: Some(thread_id),
            slash_commands: SharedSlashCommands::default(),
            stderr,
        })
    }

    /// `initialize` → `initialized` → thread → first turn.
    async fn handshake(
        &self,
        rpc: &RpcClient,
        opts: &SpawnOptions,
        resume: Option<&str>,
    ) -> Result<(String, Option<String>), EngineError> {
        rpc.call(
            "initialize",
            json!({
                "clientInfo": {
                    "name": "overseer",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        )
        .await?;
        rpc.notify("initialized", json!({})).await?;

        let thread_result = match resume {
            Some(thread_id) => {
                rpc.call("resumeThread", json!({ "threadId": thread_id }))
                    .await?
            }
            None => {
                let cwd = opts
                    .working_dir
                    .as_ref()
                    .map(|p| p.display().to_string());
                rpc.call("newThread", json!({ "cwd": cwd })).await?
            }
        };
        let thread_id = extract_thread_id(&thread_result).ok_or_else(|| {
            EngineError::Protocol(format!("thread response without id: {thread_result}"))
        })?;

        let mut turn_params = json!({ "threadId": thread_id, "prompt": opts.prompt });
        if let Some(model) = &opts.model {
            turn_params["model"] = json!(model);
        }
        let turn_result = rpc.call("startTurn", turn_params).await?;
        let turn_id = extract_turn_id(&turn_result);

        Ok((thread_id, turn_id))
    }
}

#[async_trait]
impl EngineExecutor for CodexExecutor {
    fn kind(&self) -> EngineKind {
        EngineKind::Codex
    }

    async fn spawn(&self, opts: &SpawnOptions) -> Result<SpawnedProcess, EngineError> {
        self.launch(opts, None).await
    }

    async fn spawn_follow_up(&self, opts: &SpawnOptions) -> Result<SpawnedProcess, EngineError> {
        let external = opts
            .external_session_id
            .clone()
            .ok_or(EngineError::MissingExternalSessionId)?;
        self.launch(opts, Some(external)).await
    }

    async fn availability(&self) -> EngineAvailability {
        let program = &self.config.codex.program;
        let mut cmd = tokio::process::Command::new(program);
        cmd.arg("--version");

        match run_with_timeout(cmd, Duration::from_secs(10), "codex version probe").await {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                EngineAvailability {
                    engine: EngineKind::Codex,
                    installed: true,
                    version: (!version.is_empty()).then_some(version),
                    binary_path: find_in_path(program),
                    auth_status: detect_auth(),
                    error: None,
                }
            }
            Ok(output) => EngineAvailability::not_installed(
                EngineKind::Codex,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ),
            Err(e) => EngineAvailability::not_installed(EngineKind::Codex, e),
        }
    }

    /// Short-lived RPC session: `initialize` → `initialized` →
    /// `model/list` (cursor-paginated) → kill.
    async fn models(&self) -> Result<Vec<ModelInfo>, EngineError> {
        let spec = CommandSpec::new(&self.config.codex.program)
            .args(self.config.codex.args.iter().cloned())
            .env(safe_env(&self.config, &[]));
        let child = spawn_supervised(&spec)?;
        let writer = LineWriter::new(child.stdin);
        let (rpc, _lines) = RpcClient::start(writer, child.stdout, self.rpc_timeout());

        let result = async {
            rpc.call(
                "initialize",
                json!({ "clientInfo": { "name": "overseer", "version": env!("CARGO_PKG_VERSION") } }),
            )
            .await?;
            rpc.notify("initialized", json!({})).await?;

            let mut models = Vec::new();
            let mut cursor: Option<String> = None;
            loop {
                let page = rpc.call("model/list", json!({ "cursor": cursor })).await?;
                models.extend(parse_model_page(&page));
                cursor = page
                    .get("nextCursor")
                    .and_then(Value::as_str)
                    .map(String::from);
                if cursor.is_none() {
                    break;
                }
            }
            Ok(models)
        }
        .await;

        child.kill.kill().await;
        result
    }

    fn normalizer(&self) -> Box<dyn LogNormalizer> {
        Box::new(CodexNormalizer::new(self.config.filter_rules.clone()))
    }
}

/// Control surface over a codex app-server child.
struct CodexControl {
    rpc: RpcClient,
    writer: LineWriter,
    thread_id: String,
    current_turn: Arc<Mutex<Option<String>>>,
    kill: KillSwitch,
    running: Arc<AtomicBool>,
}

#[async_trait]
impl ProcessControl for CodexControl {
    async fn send_user_message(&self, text: &str) -> Result<(), EngineError> {
        let result = self
            .rpc
            .call(
                "startTurn",
                json!({ "threadId": self.thread_id, "prompt": text }),
            )
            .await?;
        *self.current_turn.lock() = extract_turn_id(&result);
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), EngineError> {
        let turn_id = self.current_turn.lock().clone();
        let params = json!({ "threadId": self.thread_id, "turnId": turn_id });
        // Best effort: interrupt failures are swallowed.
        if let Err(e) = self.rpc.call("interrupt", params).await {
            tracing::debug!(error = %e, "interrupt call failed");
        }
        Ok(())
    }

    async fn close(&self) {
        self.writer.close().await;
    }

    async fn kill(&self) {
        self.kill.kill().await;
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn extract_thread_id(result: &Value) -> Option<String> {
    result
        .get("threadId")
        .or_else(|| result.pointer("/thread/id"))
        .and_then(Value::as_str)
        .map(String::from)
}

fn extract_turn_id(result: &Value) -> Option<String> {
    result
        .get("turnId")
        .or_else(|| result.pointer("/turn/id"))
        .and_then(Value::as_str)
        .map(String::from)
}

fn parse_model_page(page: &Value) -> Vec<ModelInfo> {
    page.get("models")
        .or_else(|| page.get("items"))
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .filter_map(|m| {
                    let id = m.get("id").and_then(Value::as_str)?.to_string();
                    let display_name = m
                        .get("displayName")
                        .and_then(Value::as_str)
                        .unwrap_or(&id)
                        .to_string();
                    Some(ModelInfo {
                        id,
                        display_name,
                        default: m.get("default").and_then(Value::as_bool).unwrap_or(false),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Authenticated iff an API key is exported or the CLI's auth file exists.
fn detect_auth() -> AuthStatus {
    if std::env::var("OPENAI_API_KEY").is_ok_and(|v| !v.is_empty()) {
        return AuthStatus::Authenticated;
    }
    let Some(home) = dirs::home_dir() else {
        return AuthStatus::Unknown;
    };
    if home.join(".codex/auth.json").exists() {
        AuthStatus::Authenticated
    } else {
        AuthStatus::Unauthenticated
    }
}

#[cfg(test)]
#[path = "codex_tests.rs"]
mod tests;
