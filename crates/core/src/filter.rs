// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool-call filter rules and entry visibility.
//!
//! Filter rules are the single censorship mechanism in the pipeline: a
//! matching tool call is suppressed before ring-buffer insertion, together
//! with its later result. Visibility is orthogonal: it decides which
//! persisted entries a non-dev reader gets back.

use crate::entry::{EntryType, NormalizedEntry};
use serde::{Deserialize, Serialize};

/// What a filter rule matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterRuleKind {
    /// Match the tool name exactly.
    ToolName,
}

/// Operator-supplied rule causing a tool call (and its result) to be
/// censored from the live and persisted log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFilterRule {
    #[serde(rename = "type")]
    pub kind: FilterRuleKind,
    #[serde(rename = "match")]
    pub pattern: String,
    pub enabled: bool,
}

impl WriteFilterRule {
    /// Rule suppressing a tool by exact name.
    pub fn tool_name(pattern: impl Into<String>) -> Self {
        Self {
            kind: FilterRuleKind::ToolName,
            pattern: pattern.into(),
            enabled: true,
        }
    }

    /// Whether this rule suppresses a call to `tool`.
    pub fn matches_tool(&self, tool: &str) -> bool {
        self.enabled && self.kind == FilterRuleKind::ToolName && self.pattern == tool
    }
}

/// System-message subtypes that stay visible outside dev mode.
const VISIBLE_SYSTEM_SUBTYPES: &[&str] = &["command_output", "compact_boundary"];

/// Second-stage visibility filter applied after the persisted read.
///
/// Dev mode sees everything. Otherwise only user and assistant messages
/// pass unconditionally; system messages pass for a short allowlist of
/// subtypes; tool rows and the rest are hidden.
pub fn is_visible_for_mode(entry: &NormalizedEntry, dev_mode: bool) -> bool {
    if dev_mode {
        return true;
    }
    match entry.entry_type {
        EntryType::UserMessage | EntryType::AssistantMessage => true,
        EntryType::SystemMessage => entry
            .subtype()
            .is_some_and(|s| VISIBLE_SYSTEM_SUBTYPES.contains(&s)),
        _ => false,
    }
}

#[cfg(test)]
#[path = "filter_tests.rs"]
mod tests;
