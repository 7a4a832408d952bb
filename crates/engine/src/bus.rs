// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multi-subscriber event fan-out.
//!
//! Subscribers are keyed by `(kind, issue?)` and each gets a bounded
//! channel. Emission is synchronous from the publisher's task and never
//! blocks: a full subscriber drops the event rather than stalling the
//! reader loop.

use ov_core::{EngineEvent, EventKind, IssueId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Per-subscriber channel capacity.
const SUBSCRIBER_CAPACITY: usize = 256;

struct Subscriber {
    kind: EventKind,
    issue: Option<IssueId>,
    tx: mpsc::Sender<EngineEvent>,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

/// Broadcast bus for engine events.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

/// A live subscription; dropping the receiver detaches it lazily.
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event kind, optionally scoped to a single issue.
    pub fn subscribe(&self, kind: EventKind, issue: Option<IssueId>) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.insert(id, Subscriber { kind, issue, tx });
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner.lock().subscribers.remove(&id);
    }

    /// Fan an event out to matching subscribers. Non-blocking: slow
    /// consumers lose events, dead consumers are detached.
    pub fn emit(&self, event: &EngineEvent) {
        let mut dead = Vec::new();
        {
            let inner = self.inner.lock();
            for (id, subscriber) in inner.subscribers.iter() {
                if subscriber.kind != event.kind() {
                    continue;
                }
                if let Some(issue) = &subscriber.issue {
                    if issue != event.issue_id() {
                        continue;
                    }
                }
                match subscriber.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            subscriber = id,
                            kind = ?event.kind(),
                            "subscriber full, dropping event"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
                }
            }
        }
        if !dead.is_empty() {
            let mut inner = self.inner.lock();
            for id in dead {
                inner.subscribers.remove(&id);
            }
        }
    }

    /// Number of live subscribers (for tests and introspection).
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
