// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor for the streaming-JSON engine (Claude Code CLI).
//!
//! Sessions are addressed by a UUID we mint and pass via `--session-id`;
//! follow-up turns resume with `--resume <id>`. The protocol is
//! newline-delimited JSON on both pipes, with control requests intercepted
//! by [`super::claude_protocol`].

use super::claude_normalize::ClaudeNormalizer;
use super::claude_protocol::{self, ClaudeControl};
use super::{
    drain_stderr, spawn_supervised, EngineError, EngineExecutor, LineWriter, LogNormalizer,
    ProcessHandle, SharedSlashCommands, SpawnOptions, SpawnedProcess, StderrTail,
};
use crate::command::{safe_env, CommandSpec};
use crate::subprocess::{find_in_path, run_with_timeout};
use async_trait::async_trait;
use ov_core::{AuthStatus, Config, EngineAvailability, EngineKind, ModelInfo};
use std::sync::Arc;
use std::time::Duration;

/// Fallback invocation when the `claude` binary is not on PATH.
const PACKAGE_RUNNER: [&str; 2] = ["npx", "@anthropic-ai/claude-code"];

/// Executor for Claude Code.
pub struct ClaudeExecutor {
    config: Arc<Config>,
}

impl ClaudeExecutor {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn build_spec(&self, opts: &SpawnOptions, session: &SessionAddress) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.config.claude.program)
            .args(self.config.claude.args.iter().cloned());

        if let Some(model) = &opts.model {
            spec = spec.args(["--model", model]);
        }
        if let Some(mode) = &opts.permission_mode {
            spec = spec.args(["--permission-mode", mode]);
        }
        match session {
            SessionAddress::Fresh(id) => spec = spec.args(["--session-id", id]),
            SessionAddress::Resume(id) => spec = spec.args(["--resume", id]),
        }

        spec.env(safe_env(&self.config, &[]))
            .cwd(opts.working_dir.clone())
    }

    async fn launch(
        &self,
        opts: &SpawnOptions,
        session: SessionAddress,
    ) -> Result<SpawnedProcess, EngineError> {
        let spec = self.build_spec(opts, &session);
        tracing::debug!(
            issue_id = %opts.issue_id,
            execution_id = %opts.execution_id,
            program = %spec.program,
            "spawning claude session"
        );

        let child = spawn_supervised(&spec)?;
        let writer = LineWriter::new(child.stdin);
        let slash_commands = SharedSlashCommands::default();
        let lines = claude_protocol::wrap_stdout(
            child.stdout,
            writer.clone(),
            slash_commands.clone(),
        );

        let stderr = StderrTail::default();
        drain_stderr(child.stderr, stderr.clone());

        let control = ClaudeControl::new(writer, child.kill, child.running);
        let handle = ProcessHandle::new(Arc::new(control));

        // Initial user message goes over stdin like any other.
        handle.send_user_message(&opts.prompt).await?;

        Ok(SpawnedProcess {
            execution_id: opts.execution_id.clone(),
            lines,
            exit: child.exit,
            handle,
            external_session_id: Some(session.into_id()),
            slash_commands,
            stderr,
        })
    }
}

/// How the spawned session is addressed.
enum SessionAddress {
    Fresh(String),
    Resume(String),
}

impl SessionAddress {
    fn into_id(self) -> String {
        match self {
            SessionAddress::Fresh(id) | SessionAddress::Resume(id) => id,
        }
    }
}

#[async_trait]
impl EngineExecutor for ClaudeExecutor {
    fn kind(&self) -> EngineKind {
        EngineKind::Claude
    }

    async fn spawn(&self, opts: &SpawnOptions) -> Result<SpawnedProcess, EngineError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.launch(opts, SessionAddress::Fresh(session_id)).await
    }

    async fn spawn_follow_up(&self, opts: &SpawnOptions) -> Result<SpawnedProcess, EngineError> {
        let external = opts
            .external_session_id
            .clone()
            .ok_or(EngineError::MissingExternalSessionId)?;
        self.launch(opts, SessionAddress::Resume(external)).await
    }

    async fn availability(&self) -> EngineAvailability {
        let program = &self.config.claude.program;
        let budget = Duration::from_secs(10);

        let mut binary_path = find_in_path(program);
        let mut cmd = tokio::process::Command::new(program);
        cmd.arg("--version");
        let mut probe = run_with_timeout(cmd, budget, "claude version probe").await;

        if probe.is_err() && binary_path.is_none() {
            // Direct binary absent: fall back to the package runner.
            let mut cmd = tokio::process::Command::new(PACKAGE_RUNNER[0]);
            cmd.arg(PACKAGE_RUNNER[1]).arg("--version");
            probe = run_with_timeout(cmd, budget, "claude npx probe").await;
            binary_path = find_in_path(PACKAGE_RUNNER[0]);
        }

        match probe {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                EngineAvailability {
                    engine: EngineKind::Claude,
                    installed: true,
                    version: (!version.is_empty()).then_some(version),
                    binary_path,
                    auth_status: detect_auth(),
                    error: None,
                }
            }
            Ok(output) => EngineAvailability::not_installed(
                EngineKind::Claude,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ),
            Err(e) => EngineAvailability::not_installed(EngineKind::Claude, e),
        }
    }

    async fn models(&self) -> Result<Vec<ModelInfo>, EngineError> {
        Ok(vec![
            ModelInfo {
                id: "sonnet".to_string(),
                display_name: "Claude Sonnet".to_string(),
                default: true,
            },
            ModelInfo {
                id: "opus".to_string(),
                display_name: "Claude Opus".to_string(),
                default: false,
            },
            ModelInfo {
                id: "haiku".to_string(),
                display_name: "Claude Haiku".to_string(),
                default: false,
            },
        ])
    }

    fn normalizer(&self) -> Box<dyn LogNormalizer> {
        Box::new(ClaudeNormalizer::new(self.config.filter_rules.clone()))
    }
}

/// Authenticated iff an API key is exported or the CLI's credential file
/// exists in the user home.
fn detect_auth() -> AuthStatus {
    if std::env::var("ANTHROPIC_API_KEY").is_ok_and(|v| !v.is_empty()) {
        return AuthStatus::Authenticated;
    }
    let Some(home) = dirs::home_dir() else {
        return AuthStatus::Unknown;
    };
    let credential_files = [home.join(".claude/.credentials.json"), home.join(".claude.json")];
    if credential_files.iter().any(|p| p.exists()) {
        AuthStatus::Authenticated
    } else {
        AuthStatus::Unauthenticated
    }
}

#[cfg(test)]
#[path = "claude_tests.rs"]
mod tests;
