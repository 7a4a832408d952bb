// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC lite client over child stdio.
//!
//! JSONL framing without the `"jsonrpc":"2.0"` header. A single reader
//! task demuxes the stream: responses (`id` + `result`/`error`) complete
//! waiting calls; everything else is forwarded raw to the notification
//! channel for the engine's normalizer.

use super::{EngineError, LineWriter};
use ov_core::EngineKind;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, oneshot};

type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, EngineError>>>>>;

/// Client half of the JSON-RPC lite transport.
#[derive(Clone)]
pub(crate) struct RpcClient {
    writer: LineWriter,
    waiters: Waiters,
    next_id: Arc<AtomicU64>,
    timeout: Duration,
}

impl RpcClient {
    /// Start the shared reader loop over `stdout`.
    ///
    /// Returns the client and the downstream notification line stream.
    pub(crate) fn start(
        writer: LineWriter,
        stdout: tokio::process::ChildStdout,
        timeout: Duration,
    ) -> (Self, mpsc::Receiver<String>) {
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
        let (notify_tx, notify_rx) = mpsc::channel(256);

        let reader_waiters = Arc::clone(&waiters);
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                crate::iolog::log_inbound(EngineKind::Codex, &line);
                match route_response(&reader_waiters, &line) {
                    Routed::Response => {}
                    Routed::Notification => {
                        if notify_tx.send(line).await.is_err() {
                            break;
                        }
                    }
                }
            }
            // EOF: fail anything still waiting.
            let mut waiters = reader_waiters.lock();
            for (_, tx) in waiters.drain() {
                let _ = tx.send(Err(EngineError::Closed));
            }
        });

        (
            Self {
                writer,
                waiters,
                next_id: Arc::new(AtomicU64::new(1)),
                timeout,
            },
            notify_rx,
        )
    }

    /// Send a request and await its response within the deadline.
    pub(crate) async fn call(&self, method: &str, params: Value) -> Result<Value, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id, tx);

        let frame = json!({ "id": id, "method": method, "params": params }).to_string();
        crate::iolog::log_outbound(EngineKind::Codex, &frame);
        if let Err(e) = self.writer.write_line(&frame).await {
            self.waiters.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::Closed),
            Err(_) => {
                self.waiters.lock().remove(&id);
                Err(EngineError::RpcTimeout {
                    method: method.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Fire-and-forget notification.
    pub(crate) async fn notify(&self, method: &str, params: Value) -> Result<(), EngineError> {
        let frame = json!({ "method": method, "params": params }).to_string();
        crate::iolog::log_outbound(EngineKind::Codex, &frame);
        self.writer.write_line(&frame).await
    }
}

enum Routed {
    Response,
    Notification,
}

/// Route one inbound line: response to a waiter, or downstream.
fn route_response(waiters: &Waiters, line: &str) -> Routed {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return Routed::Notification;
    };
    let Some(id) = value.get("id").and_then(Value::as_u64) else {
        return Routed::Notification;
    };
    if value.get("result").is_none() && value.get("error").is_none() {
        // A request from the server (has id + method) is not a response.
        return Routed::Notification;
    }

    let Some(tx) = waiters.lock().remove(&id) else {
        tracing::warn!(id, "response for unknown request id");
        return Routed::Response;
    };

    let outcome = match value.get("error") {
        Some(error) if !error.is_null() => {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            Err(EngineError::Rpc { code, message })
        }
        _ => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
    };
    let _ = tx.send(outcome);
    Routed::Response
}

#[cfg(test)]
#[path = "codex_rpc_tests.rs"]
mod tests;
