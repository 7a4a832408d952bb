// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending-message prompt assembly.

use ov_core::MessageId;
use ov_storage::PendingRow;

/// Join a base prompt with queued pending messages.
///
/// Messages are separated by blank lines, in insertion order. Returns the
/// effective prompt and the ids to mark dispatched once the engine call
/// consuming them succeeds.
pub fn collect_pending(base_prompt: &str, pending: &[PendingRow]) -> (String, Vec<MessageId>) {
    let mut parts: Vec<&str> = Vec::with_capacity(pending.len() + 1);
    if !base_prompt.trim().is_empty() {
        parts.push(base_prompt);
    }
    parts.extend(pending.iter().map(|row| row.content.as_str()));

    let ids = pending.iter().map(|row| row.id.clone()).collect();
    (parts.join("\n\n"), ids)
}

#[cfg(test)]
#[path = "pending_tests.rs"]
mod tests;
