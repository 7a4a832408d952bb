// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Engine adapters for Overseer.
//!
//! One executor per external coding agent CLI. An executor spawns the
//! vendor binary, owns its stdio protocol, and produces a filtered line
//! stream the issue engine feeds through the engine's normalizer.

pub mod command;
pub mod engine;
pub mod env;
mod iolog;
pub mod subprocess;

pub use command::{safe_env, CommandSpec};
pub use engine::{
    cancel_with_grace, ClaudeNormalizer, CodexNormalizer, EngineError, EngineExecutor,
    EngineRegistry, LogNormalizer, ProcessControl, ProcessHandle, SharedSlashCommands,
    SpawnOptions, SpawnedProcess, StderrTail,
};

#[cfg(any(test, feature = "test-support"))]
pub use engine::fake::{FakeCall, FakeEngine, FakeEngineConfig};
