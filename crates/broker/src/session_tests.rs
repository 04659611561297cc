// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::event_hub::EventHub;
use std::sync::atomic::AtomicUsize;

/// A tiny shell "child" that echoes back `{"jsonrpc":"2.0","id":<id>,"result":"pong"}`
/// for every line it reads, regardless of the input method.
const ECHO_PONG_SCRIPT: &str = r#"
while IFS= read -r line; do
  id=$(echo "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  if [ -n "$id" ]; then
    printf '{"jsonrpc":"2.0","id":%s,"result":"pong"}\n' "$id"
  fi
done
"#;

async fn spawn_echo() -> (Arc<ChildSession>, Arc<EventHub>, Arc<AtomicUsize>) {
    let hub = EventHub::new(16);
    let died = Arc::new(AtomicUsize::new(0));
    let died_clone = Arc::clone(&died);
    let session = ChildSession::spawn(
        "/bin/sh",
        &["-c".to_owned(), ECHO_PONG_SCRIPT.to_owned()],
        Arc::clone(&hub),
        Box::new(move || {
            died_clone.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .await
    .expect("spawn echo child");
    (session, hub, died)
}

#[tokio::test]
async fn send_rpc_request_resolves_with_response() {
    let (session, _hub, _died) = spawn_echo().await;
    let envelope = serde_json::json!({"jsonrpc":"2.0","method":"ping","id":1});
    let bytes = session.send_rpc(envelope, None).await.expect("response");
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["id"], 1);
    assert_eq!(value["result"], "pong");
}

#[tokio::test]
async fn notification_without_id_returns_constant_ack() {
    let (session, _hub, _died) = spawn_echo().await;
    let envelope = serde_json::json!({"jsonrpc":"2.0","method":"logged"});
    let bytes = session.send_rpc(envelope, None).await.expect("ack");
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["result"], Value::Null);
}

#[tokio::test]
async fn every_stdout_line_is_also_published_as_an_event() {
    let (session, hub, _died) = spawn_echo().await;
    let mut sub = hub.subscribe_from(0);
    let envelope = serde_json::json!({"jsonrpc":"2.0","method":"ping","id":7});
    session.send_rpc(envelope, None).await.expect("response");

    let event = sub.recv().await.expect("published event");
    assert_eq!(event.kind, "child_stdout");
    let value: Value = serde_json::from_slice(&event.payload).unwrap();
    assert_eq!(value["id"], 7);
}

#[tokio::test]
async fn kill_marks_dead_and_fires_on_dead_exactly_once() {
    let (session, _hub, died) = spawn_echo().await;
    session.kill();
    session.kill();
    assert!(session.is_dead());
    // Give the waiter task a moment to also observe the exit and attempt
    // its own (idempotent) mark_dead call.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(died.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn send_rpc_after_kill_returns_not_running() {
    let (session, _hub, _died) = spawn_echo().await;
    session.kill();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let envelope = serde_json::json!({"jsonrpc":"2.0","method":"ping","id":1});
    let result = session.send_rpc(envelope, None).await;
    assert_eq!(result, Err(ErrorCode::NotRunning));
}

#[tokio::test]
async fn send_rpc_times_out_when_child_never_responds() {
    let hub = EventHub::new(16);
    let session = ChildSession::spawn(
        "/bin/sh",
        &["-c".to_owned(), "cat > /dev/null".to_owned()],
        hub,
        Box::new(|| {}),
    )
    .await
    .expect("spawn silent child");

    let envelope = serde_json::json!({"jsonrpc":"2.0","method":"ping","id":1});
    let result = session.send_rpc(envelope, Some(Duration::from_millis(50))).await;
    assert_eq!(result, Err(ErrorCode::Timeout));
    session.kill();
}

#[tokio::test]
async fn canonicalizes_numeric_and_string_ids() {
    assert_eq!(canonicalize_id(&serde_json::json!(42)), Some("42".to_owned()));
    assert_eq!(canonicalize_id(&serde_json::json!("abc")), Some("abc".to_owned()));
    assert_eq!(canonicalize_id(&serde_json::json!(null)), None);
}

#[tokio::test]
async fn initialize_reply_is_cached_and_reused_for_later_callers() {
    let hub = EventHub::new(16);
    let script = r#"
n=0
while IFS= read -r line; do
  n=$((n+1))
  id=$(echo "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  printf '{"jsonrpc":"2.0","id":%s,"result":{"call":%s}}\n' "$id" "$n"
done
"#;
    let session = ChildSession::spawn(
        "/bin/sh",
        &["-c".to_owned(), script.to_owned()],
        hub,
        Box::new(|| {}),
    )
    .await
    .expect("spawn counting child");

    let first =
        session.send_rpc(serde_json::json!({"jsonrpc":"2.0","method":"initialize","id":1}), None)
            .await
            .expect("first initialize");
    let first_value: Value = serde_json::from_slice(&first).unwrap();
    assert_eq!(first_value["result"]["call"], 1);

    // A second initialize from a "different" caller id must reuse the
    // cached result rather than round-tripping the child again.
    let second =
        session.send_rpc(serde_json::json!({"jsonrpc":"2.0","method":"initialize","id":99}), None)
            .await
            .expect("second initialize, served from cache");
    let second_value: Value = serde_json::from_slice(&second).unwrap();
    assert_eq!(second_value["id"], 99);
    assert_eq!(second_value["result"]["call"], 1);

    session.kill();
}
