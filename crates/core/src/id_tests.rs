// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn short_truncates_long_ids() {
    let id = IssueId::new("abcdefghij");
    assert_eq!(id.short(4), "abcd");
}

#[test]
fn short_returns_whole_id_when_small() {
    let id = IssueId::new("abc");
    assert_eq!(id.short(8), "abc");
}

#[test]
fn sequential_id_gen_counts_up() {
    let id_gen = SequentialIdGen::new("msg");
    assert_eq!(id_gen.next(), "msg-1");
    assert_eq!(id_gen.next(), "msg-2");
}

#[test]
fn uuid_id_gen_is_unique() {
    let id_gen = UuidIdGen;
    assert_ne!(id_gen.next(), id_gen.next());
}

#[test]
fn message_ids_sort_by_creation_time() {
    // UUIDv7 embeds a millisecond timestamp in the leading bits; ids
    // generated in sequence must never sort backwards.
    let mut ids = Vec::new();
    for _ in 0..64 {
        ids.push(new_message_id());
    }
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[test]
fn id_equality_against_str() {
    let id = ExecutionId::new("exec-1");
    assert_eq!(id, "exec-1");
    assert_eq!(id.as_str(), "exec-1");
}
