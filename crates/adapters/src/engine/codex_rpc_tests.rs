// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn waiters_with(id: u64) -> (Waiters, oneshot::Receiver<Result<Value, EngineError>>) {
    let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
    let (tx, rx) = oneshot::channel();
    waiters.lock().insert(id, tx);
    (waiters, rx)
}

#[tokio::test]
async fn success_response_completes_waiter() {
    let (waiters, rx) = waiters_with(1);
    let routed = route_response(&waiters, r#"{"id":1,"result":{"threadId":"t1"}}"#);
    assert!(matches!(routed, Routed::Response));
    let result = rx.await.unwrap().unwrap();
    assert_eq!(result["threadId"], "t1");
    assert!(waiters.lock().is_empty());
}

#[tokio::test]
async fn error_response_fails_waiter() {
    let (waiters, rx) = waiters_with(2);
    route_response(
        &waiters,
        r#"{"id":2,"error":{"code":-32601,"message":"method not found"}}"#,
    );
    let err = rx.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rpc { code: -32601, ref message } if message == "method not found"
    ));
}

#[test]
fn notifications_are_not_routed_to_waiters() {
    let (waiters, _rx) = waiters_with(1);
    for line in [
        r#"{"method":"item/started","params":{}}"#,
        r#"{"id":9,"method":"server/ping","params":{}}"#,
        "not json",
    ] {
        assert!(matches!(
            route_response(&waiters, line),
            Routed::Notification
        ));
    }
    assert_eq!(waiters.lock().len(), 1, "waiter untouched");
}

#[test]
fn response_for_unknown_id_is_swallowed() {
    let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
    assert!(matches!(
        route_response(&waiters, r#"{"id":42,"result":null}"#),
        Routed::Response
    ));
}
