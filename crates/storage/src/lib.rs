// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Durable storage for Overseer: issue logs, tool details, pending
//! messages and session records.
//!
//! Architecture: a JSONL write-ahead log of [`StorageEvent`] records is the
//! durability point; a zstd-compressed snapshot of the materialized state
//! bounds replay time. Recovery = snapshot load + WAL replay.

mod snapshot;
mod state;
mod store;
mod types;
mod wal;

pub use snapshot::{Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
pub use state::MaterializedState;
pub use store::{Cursor, LogQuery, LogStore, StoreError};
pub use types::{LogRow, PendingRow, SessionRecord, StorageEvent, ToolRow};
pub use wal::{Wal, WalEntry, WalError};
