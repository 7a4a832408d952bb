// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine identification and availability probing results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Which external coding agent CLI an execution talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Streaming-JSON protocol over stdio
    Claude,
    /// JSON-RPC lite protocol over stdio (app-server mode)
    Codex,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Claude => "claude",
            EngineKind::Codex => "codex",
        }
    }

    /// All known engine kinds, in registry order.
    pub fn all() -> &'static [EngineKind] {
        &[EngineKind::Claude, EngineKind::Codex]
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error for parsing an unknown engine tag.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown engine: {0}")]
pub struct UnknownEngine(pub String);

impl FromStr for EngineKind {
    type Err = UnknownEngine;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(EngineKind::Claude),
            "codex" => Ok(EngineKind::Codex),
            other => Err(UnknownEngine(other.to_string())),
        }
    }
}

/// Result of probing whether an engine CLI can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Authenticated,
    Unauthenticated,
    Unknown,
}

/// Availability report for one engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineAvailability {
    pub engine: EngineKind,
    pub installed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,
    pub auth_status: AuthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EngineAvailability {
    /// Report for an engine whose binary could not be found.
    pub fn not_installed(engine: EngineKind, error: impl Into<String>) -> Self {
        Self {
            engine,
            installed: false,
            version: None,
            binary_path: None,
            auth_status: AuthStatus::Unknown,
            error: Some(error.into()),
        }
    }
}

/// One selectable model for an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub default: bool,
}

#[cfg(test)]
#[path = "engines_tests.rs"]
mod tests;
