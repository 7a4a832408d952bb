// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared human-readable usage formatting.

/// Format a token count in compact form: `850`, `1.5k`, `12k`.
///
/// Counts below 1000 render verbatim; above, a trailing `.0` is dropped.
pub fn format_token_count(tokens: u64) -> String {
    if tokens < 1000 {
        return tokens.to_string();
    }
    let k = tokens as f64 / 1000.0;
    if k == k.floor() {
        format!("{}k", k as u64)
    } else {
        format!("{k:.1}k")
    }
}

/// Format milliseconds as a short duration: `"420ms"`, `"4.2s"`, `"2m5s"`.
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        let secs = ms as f64 / 1000.0;
        if secs == secs.floor() {
            format!("{}s", secs as u64)
        } else {
            format!("{secs:.1}s")
        }
    } else {
        let m = ms / 60_000;
        let s = (ms % 60_000) / 1000;
        if s > 0 {
            format!("{}m{}s", m, s)
        } else {
            format!("{}m", m)
        }
    }
}

/// Usage line for a completed turn: `"12.5k input · 3.4k output"`.
pub fn turn_usage_line(input_tokens: u64, output_tokens: u64) -> String {
    format!(
        "{} input · {} output",
        format_token_count(input_tokens),
        format_token_count(output_tokens)
    )
}

/// Summary for a final result message; joins the known parts with ` · `.
pub fn result_summary_line(
    duration_ms: Option<u64>,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cost_usd: Option<f64>,
) -> String {
    let mut parts = Vec::new();
    if let Some(ms) = duration_ms {
        parts.push(format_duration_ms(ms));
    }
    if let Some(t) = input_tokens {
        parts.push(format!("{} input", format_token_count(t)));
    }
    if let Some(t) = output_tokens {
        parts.push(format!("{} output", format_token_count(t)));
    }
    if let Some(c) = cost_usd {
        parts.push(format!("${c:.4}"));
    }
    parts.join(" · ")
}

#[cfg(test)]
#[path = "usage_tests.rs"]
mod tests;
