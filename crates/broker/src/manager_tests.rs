// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn manager(cap: usize) -> Arc<SessionManager> {
    SessionManager::new("/bin/sh".to_owned(), cap, 16, None, CancellationToken::new())
}

#[tokio::test]
async fn ensure_rejects_empty_key() {
    let mgr = manager(4);
    assert_eq!(mgr.ensure("").await.unwrap_err(), ErrorCode::BadRequest);
}

#[tokio::test]
async fn ensure_spawns_and_reuses_the_same_session() {
    let mgr = manager(4);
    let first = mgr.ensure("a").await.expect("spawn");
    let second = mgr.ensure("a").await.expect("reuse");
    assert_eq!(first.pid(), second.pid());
    assert_eq!(mgr.running_sessions(), 1);
    first.kill();
}

#[tokio::test]
async fn two_distinct_clients_get_two_sessions() {
    let mgr = manager(4);
    let a = mgr.ensure("a").await.expect("spawn a");
    let b = mgr.ensure("b").await.expect("spawn b");
    assert_ne!(a.pid(), b.pid());
    assert_eq!(mgr.running_sessions(), 2);
    a.kill();
    b.kill();
}

#[tokio::test]
async fn admission_cap_rejects_once_exceeded() {
    let mgr = manager(1);
    let a = mgr.ensure("a").await.expect("first session admitted");
    let err = mgr.ensure("b").await.unwrap_err();
    assert_eq!(err, ErrorCode::MaxSessions);
    assert_eq!(mgr.running_sessions(), 1);
    a.kill();
}

#[tokio::test]
async fn dead_session_is_replaced_on_next_ensure_without_exceeding_cap() {
    let mgr = manager(1);
    let first = mgr.ensure("a").await.expect("first session");
    first.kill();
    // Give the waiter task a moment to run on_dead and release the slot.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = mgr.ensure("a").await.expect("replacement session for the same client");
    assert_ne!(first.pid(), second.pid());
    second.kill();
}

#[tokio::test]
async fn events_does_not_spawn_a_session() {
    let mgr = manager(4);
    let _hub = mgr.events("c").await;
    assert_eq!(mgr.running_sessions(), 0);
}

#[tokio::test]
async fn snapshot_reflects_has_ever_run_and_running_state() {
    let mgr = manager(4);
    let before = mgr.snapshot("a").await;
    assert!(!before.has_ever_run);
    assert!(!before.running);

    let session = mgr.ensure("a").await.expect("spawn");
    let after = mgr.snapshot("a").await;
    assert!(after.has_ever_run);
    assert!(after.running);
    session.kill();
}

#[tokio::test]
async fn spawn_failure_releases_the_admission_slot() {
    let mgr = manager(1);
    // No binary named this exists; spawn must fail and the slot must be
    // released so a subsequent client can still be admitted.
    let broken = SessionManager::new(
        "/nonexistent/climate-child-binary".to_owned(),
        1,
        16,
        None,
        CancellationToken::new(),
    );
    assert_eq!(broken.ensure("a").await.unwrap_err(), ErrorCode::SpawnFailed);
    assert_eq!(broken.running_sessions(), 0);
}
