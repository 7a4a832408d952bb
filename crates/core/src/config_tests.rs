// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn default_claude_command_streams_json() {
    let config = Config::default();
    assert_eq!(config.claude.program, "claude");
    assert!(config
        .claude
        .args
        .windows(2)
        .any(|w| w == ["--output-format", "stream-json"]));
}

#[test]
fn default_codex_command_is_app_server() {
    let config = Config::default();
    assert_eq!(config.codex.program, "codex");
    assert_eq!(config.codex.args, vec!["app-server"]);
}

#[test]
fn blocklist_covers_defaults_and_internal_prefix() {
    let config = Config::default();
    assert!(config.is_env_blocked("API_SECRET"));
    assert!(config.is_env_blocked("DB_PATH"));
    assert!(config.is_env_blocked("ALLOWED_ORIGIN"));
    assert!(config.is_env_blocked("OV_STATE_DIR"));
    assert!(!config.is_env_blocked("HOME"));
    assert!(!config.is_env_blocked("ANTHROPIC_API_KEY"));
}

#[test]
fn blocklist_extends_via_config() {
    let config = Config::from_toml_str(r#"env_blocklist = ["SESSION_TOKEN"]"#).unwrap();
    assert!(config.is_env_blocked("SESSION_TOKEN"));
    assert!(config.is_env_blocked("API_SECRET"), "defaults survive extension");
}

#[test]
fn partial_toml_keeps_defaults() {
    let config = Config::from_toml_str(
        r#"
        [limits]
        ring_capacity = 64
        "#,
    )
    .unwrap();
    assert_eq!(config.limits.ring_capacity, 64);
    assert_eq!(config.limits.kill_grace_ms, 5_000);
    assert_eq!(config.claude.program, "claude");
}

#[test]
fn filter_rules_parse_with_spec_field_names() {
    let config = Config::from_toml_str(
        r#"
        [[filter_rules]]
        type = "tool-name"
        match = "Bash"
        enabled = true
        "#,
    )
    .unwrap();
    assert_eq!(config.filter_rules.len(), 1);
    assert!(config.filter_rules[0].matches_tool("Bash"));
}

#[test]
fn load_reports_missing_file() {
    let err = Config::load(Path::new("/nonexistent/overseer.toml")).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/overseer.toml"));
}
