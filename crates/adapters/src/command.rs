// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command construction and child environment hygiene.
//!
//! Every spawn goes through [`CommandSpec`] + [`safe_env`]: the child gets
//! the process environment with caller entries layered on top, secrets and
//! server-internal keys stripped, and the runtime-identification variables
//! interactive children expect. `safe_env` is applied exactly once per
//! spawn, inside the executor.

use ov_core::Config;
use std::path::PathBuf;
use std::process::Stdio;

/// Immutable description of a child process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Build the tokio command: piped stdio, cleared inherited env.
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

/// Compose the child environment.
///
/// Merge order: process env, then `extra` (caller wins), then the
/// blocklist strip, then required runtime-identification defaults.
pub fn safe_env(config: &Config, extra: &[(String, String)]) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = std::env::vars().collect();

    for (key, value) in extra {
        match merged.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.clone(),
            None => merged.push((key.clone(), value.clone())),
        }
    }

    merged.retain(|(key, _)| !config.is_env_blocked(key));

    for (key, default) in [("TERM", "xterm-256color"), ("LANG", "C.UTF-8")] {
        if !merged.iter().any(|(k, _)| k == key) {
            merged.push((key.to_string(), default.to_string()));
        }
    }

    merged
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
