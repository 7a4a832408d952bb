// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator configuration.
//!
//! Built once at startup and threaded into the executors and the issue
//! engine; nothing in the workspace reads process-wide mutable state.
//! Loadable from TOML, every field defaulted.

use crate::filter::WriteFilterRule;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Keys stripped from the child environment in addition to the
/// server-internal `OV_` prefix.
const DEFAULT_ENV_BLOCKLIST: &[&str] = &["API_SECRET", "DB_PATH", "ALLOWED_ORIGIN"];

/// Prefix marking server-internal environment keys.
const INTERNAL_ENV_PREFIX: &str = "OV_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Command template for launching one engine CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl EngineCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Tunable limits and deadlines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Max concurrently running executions per process group.
    pub max_concurrent_sessions: usize,
    /// Live-tail ring buffer capacity, entries per execution.
    pub ring_capacity: usize,
    /// Grace between the soft interrupt and the hard kill, milliseconds.
    pub kill_grace_ms: u64,
    /// Deadline for one JSON-RPC call, milliseconds.
    pub rpc_timeout_ms: u64,
    /// Budget for one engine availability probe, milliseconds.
    pub probe_timeout_ms: u64,
    /// Process-manager GC sweep interval, milliseconds.
    pub gc_interval_ms: u64,
    /// Max age for registry corpses before GC removes them, milliseconds.
    pub max_entry_age_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 16,
            ring_capacity: 10_000,
            kill_grace_ms: 5_000,
            rpc_timeout_ms: 15_000,
            probe_timeout_ms: 10_000,
            gc_interval_ms: 60_000,
            max_entry_age_ms: 24 * 60 * 60 * 1000,
        }
    }
}

/// Top-level configuration for the orchestrator core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Extra env keys stripped before spawning children (merged with the
    /// built-in defaults).
    pub env_blocklist: Vec<String>,
    pub claude: EngineCommand,
    pub codex: EngineCommand,
    pub limits: Limits,
    /// Operator-supplied tool-call censorship rules.
    pub filter_rules: Vec<WriteFilterRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_blocklist: Vec::new(),
            claude: EngineCommand::new(
                "claude",
                &[
                    "-p",
                    "--verbose",
                    "--output-format",
                    "stream-json",
                    "--input-format",
                    "stream-json",
                ],
            ),
            codex: EngineCommand::new("codex", &["app-server"]),
            limits: Limits::default(),
            filter_rules: Vec::new(),
        }
    }
}

impl Config {
    /// Parse a TOML document; absent fields keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Whether `key` must not reach a child process environment.
    pub fn is_env_blocked(&self, key: &str) -> bool {
        key.starts_with(INTERNAL_ENV_PREFIX)
            || DEFAULT_ENV_BLOCKLIST.contains(&key)
            || self.env_blocklist.iter().any(|k| k == key)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
