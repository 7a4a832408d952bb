// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the adapters crate.

use std::time::Duration;

fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Whether protocol I/O dumping is enabled (`LOG_EXECUTOR_IO`).
pub fn executor_io_logging() -> bool {
    std::env::var("LOG_EXECUTOR_IO")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Override for the JSON-RPC call deadline (default from config: 15s).
pub fn rpc_timeout_override() -> Option<Duration> {
    parse_duration_ms("OV_RPC_TIMEOUT_MS")
}

/// Override for the soft-interrupt grace before hard kill (default: 5s).
pub fn kill_grace_override() -> Option<Duration> {
    parse_duration_ms("OV_KILL_GRACE_MS")
}

/// Override for the availability probe budget (default: 10s).
pub fn probe_timeout_override() -> Option<Duration> {
    parse_duration_ms("OV_PROBE_TIMEOUT_MS")
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
