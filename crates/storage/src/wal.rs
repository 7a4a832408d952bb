// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable JSONL log of storage events.
//!
//! One frame per line: `{"seq":N,"event":{...}}`. Appends are written
//! through to the file immediately; durability is deferred to [`Wal::sync`],
//! which drains the buffer and fsyncs once per batch — the group-commit
//! point. Recovery happens wholesale at open: the file is read in a single
//! pass, a damaged tail is salvaged by copying the clean byte prefix into a
//! fresh file (the damaged original becomes a `.bak`), and the surviving
//! records are handed back for replay.
//!
//! After a checkpoint the log is [`Wal::reset`] rather than rewritten: the
//! snapshot owns everything up to the checkpoint sequence, and the counter
//! keeps counting so later records still sort after it.

use crate::types::StorageEvent;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Deferred-fsync window for group commit.
const SYNC_INTERVAL: Duration = Duration::from_millis(10);

/// Appends tolerated between fsyncs before one is forced.
const SYNC_THRESHOLD: usize = 64;

/// Errors that can occur in Wal operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wire frame, borrowed for writing.
#[derive(Serialize)]
struct FrameRef<'a> {
    seq: u64,
    event: &'a StorageEvent,
}

/// Wire frame, owned when reading back.
#[derive(Deserialize)]
struct Frame {
    seq: u64,
    event: StorageEvent,
}

/// A recovered log record.
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub seq: u64,
    pub event: StorageEvent,
}

/// Append-only event log with deferred-fsync group commit.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Last issued sequence number.
    seq: u64,
    /// Appends since the last fsync.
    dirty: usize,
    last_sync: Instant,
}

impl Wal {
    /// Open the log, salvage any damaged tail, and return the surviving
    /// records for replay.
    ///
    /// `base_seq` comes from the snapshot: the counter never falls below
    /// it, so records appended after a [`Wal::reset`] keep sorting after
    /// everything the snapshot already covers.
    pub fn open(path: &Path, base_seq: u64) -> Result<(Self, Vec<WalEntry>), WalError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let (records, damage) = read_records(path)?;
        if let Some(clean_bytes) = damage {
            warn!(
                path = %path.display(),
                kept = records.len(),
                clean_bytes,
                "damaged log tail, salvaging the clean prefix"
            );
            salvage(path, clean_bytes)?;
        }

        let seq = records
            .iter()
            .map(|record| record.seq)
            .max()
            .unwrap_or(0)
            .max(base_seq);

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok((
            Self {
                writer: BufWriter::new(file),
                path: path.to_owned(),
                seq,
                dirty: 0,
                last_sync: Instant::now(),
            },
            records,
        ))
    }

    /// Append one event, writing the frame through to the file.
    ///
    /// Returns the assigned sequence number. The record is not durable
    /// until the next [`Wal::sync`].
    pub fn append(&mut self, event: &StorageEvent) -> Result<u64, WalError> {
        self.seq += 1;
        let frame = FrameRef {
            seq: self.seq,
            event,
        };
        serde_json::to_writer(&mut self.writer, &frame)?;
        self.writer.write_all(b"\n")?;
        self.dirty += 1;
        Ok(self.seq)
    }

    /// Whether the group-commit window elapsed or enough appends piled up
    /// to warrant an fsync.
    pub fn needs_sync(&self) -> bool {
        self.dirty > 0
            && (self.dirty >= SYNC_THRESHOLD || self.last_sync.elapsed() >= SYNC_INTERVAL)
    }

    /// Durability point: drain the write buffer and fsync once.
    pub fn sync(&mut self) -> Result<(), WalError> {
        if self.dirty == 0 {
            return Ok(());
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.dirty = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Last issued sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Drop every record after a checkpoint made them redundant.
    ///
    /// The sequence counter is preserved; a reopen seeds from the
    /// snapshot's `base_seq`, so ids are never reissued.
    pub fn reset(&mut self) -> Result<(), WalError> {
        self.sync()?;
        {
            let truncated = File::create(&self.path)?;
            truncated.sync_all()?;
        }
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        Ok(())
    }
}

/// Read every intact record in one pass.
///
/// Returns the records plus `Some(clean_bytes)` when the tail is damaged:
/// the length of the newline-terminated prefix worth keeping. A final
/// line without its newline (a write cut short mid-frame) counts as
/// damage and is dropped — it was never durably framed.
fn read_records(path: &Path) -> Result<(Vec<WalEntry>, Option<u64>), WalError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), None)),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut clean_bytes = 0u64;
    let mut line = String::new();

    loop {
        line.clear();
        let n = match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Ok((records, Some(clean_bytes)));
            }
            Err(e) => return Err(e.into()),
        };

        if !line.ends_with('\n') {
            return Ok((records, Some(clean_bytes)));
        }

        let trimmed = line.trim();
        if !trimmed.is_empty() {
            match serde_json::from_str::<Frame>(trimmed) {
                Ok(frame) => records.push(WalEntry {
                    seq: frame.seq,
                    event: frame.event,
                }),
                Err(_) => return Ok((records, Some(clean_bytes))),
            }
        }

        clean_bytes += n as u64;
    }

    Ok((records, None))
}

/// Move the damaged file aside and rebuild the log from its clean prefix.
fn salvage(path: &Path, clean_bytes: u64) -> Result<(), WalError> {
    let damaged = crate::snapshot::rotate_bak_path(path);
    fs::rename(path, &damaged)?;

    let source = File::open(&damaged)?;
    let mut prefix = source.take(clean_bytes);
    let mut rebuilt = File::create(path)?;
    io::copy(&mut prefix, &mut rebuilt)?;
    rebuilt.sync_all()?;
    Ok(())
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
