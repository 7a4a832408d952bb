// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

fn get<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
    env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

#[test]
fn spec_builder_collects_args_and_cwd() {
    let spec = CommandSpec::new("claude")
        .arg("-p")
        .args(["--output-format", "stream-json"])
        .cwd(Some(PathBuf::from("/tmp")));

    assert_eq!(spec.program, "claude");
    assert_eq!(spec.args, vec!["-p", "--output-format", "stream-json"]);
    assert_eq!(spec.cwd.as_deref(), Some(std::path::Path::new("/tmp")));
}

#[test]
#[serial]
fn safe_env_strips_blocklisted_keys() {
    std::env::set_var("API_SECRET", "hunter2");
    std::env::set_var("OV_STATE_DIR", "/var/overseer");
    let config = Config::default();

    let env = safe_env(&config, &[]);

    assert_eq!(get(&env, "API_SECRET"), None);
    assert_eq!(get(&env, "OV_STATE_DIR"), None);
    std::env::remove_var("API_SECRET");
    std::env::remove_var("OV_STATE_DIR");
}

#[test]
#[serial]
fn safe_env_caller_entries_win_over_process_env() {
    std::env::set_var("EDITOR", "vi");
    let config = Config::default();

    let env = safe_env(&config, &[("EDITOR".to_string(), "nano".to_string())]);

    assert_eq!(get(&env, "EDITOR"), Some("nano"));
    std::env::remove_var("EDITOR");
}

#[test]
#[serial]
fn safe_env_adds_runtime_identification_defaults() {
    std::env::remove_var("TERM");
    let config = Config::default();

    let env = safe_env(&config, &[]);

    assert_eq!(get(&env, "TERM"), Some("xterm-256color"));
    assert!(get(&env, "LANG").is_some());
}

#[test]
#[serial]
fn safe_env_strips_blocklisted_caller_entries_too() {
    let config = Config::default();
    let env = safe_env(
        &config,
        &[("ALLOWED_ORIGIN".to_string(), "http://x".to_string())],
    );
    assert_eq!(get(&env, "ALLOWED_ORIGIN"), None);
}

#[test]
#[serial]
fn safe_env_is_idempotent() {
    let config = Config::default();
    let once = safe_env(&config, &[]);
    // Re-applying over an already-safe environment changes nothing
    let again: Vec<(String, String)> = once
        .iter()
        .filter(|(k, _)| !config.is_env_blocked(k))
        .cloned()
        .collect();
    assert_eq!(once, again);
}
