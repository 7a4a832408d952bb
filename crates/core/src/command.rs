// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shell command classification shared by the engine normalizers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse bucket describing what a shell command touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandCategory {
    Read,
    Write,
    Network,
    Other,
}

impl fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandCategory::Read => write!(f, "read"),
            CommandCategory::Write => write!(f, "write"),
            CommandCategory::Network => write!(f, "network"),
            CommandCategory::Other => write!(f, "other"),
        }
    }
}

const READ_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "less", "grep", "rg", "find", "fd", "wc", "pwd", "stat", "file",
    "which", "env", "ps", "du", "df", "tree",
];

const WRITE_COMMANDS: &[&str] = &[
    "rm", "mv", "cp", "touch", "mkdir", "rmdir", "ln", "chmod", "chown", "tee", "sed", "truncate",
];

const NETWORK_COMMANDS: &[&str] = &["curl", "wget", "ssh", "scp", "rsync", "ping", "nc", "dig"];

/// Classify a shell command into a [`CommandCategory`].
///
/// Looks at the first token after skipping `env`-style `KEY=value`
/// assignments and `sudo`. `git` is split by subcommand: fetch/pull/clone/
/// push are network, read-only inspection is read, the rest is write.
pub fn classify_command(command: &str) -> CommandCategory {
    let mut tokens = command
        .split_whitespace()
        .skip_while(|t| t.contains('=') || *t == "sudo");

    let Some(program) = tokens.next() else {
        return CommandCategory::Other;
    };
    let program = program.rsplit('/').next().unwrap_or(program);

    if READ_COMMANDS.contains(&program) {
        return CommandCategory::Read;
    }
    if WRITE_COMMANDS.contains(&program) {
        return CommandCategory::Write;
    }
    if NETWORK_COMMANDS.contains(&program) {
        return CommandCategory::Network;
    }

    if program == "git" {
        return match tokens.next() {
            Some("fetch") | Some("pull") | Some("clone") | Some("push") => {
                CommandCategory::Network
            }
            Some("status") | Some("log") | Some("diff") | Some("show") | Some("branch")
            | Some("blame") => CommandCategory::Read,
            _ => CommandCategory::Write,
        };
    }

    CommandCategory::Other
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
