// Outbox retry, dead-lettering and the background worker against a mock peer.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Notify;

use grapevine::db::models::{OutboxEntry, OutboxState};
use grapevine::federation::outbox::{now_ms, AttemptOutcome};

use common::{node, MockPeer};

#[tokio::test]
async fn failing_delivery_retries_then_goes_dead_then_requeues() {
    let peer = MockPeer::new();
    peer.set_inbox_status(500);
    let api_url = peer.spawn().await;

    let db = common::db();
    let fed = common::federation(&db);
    let peer_node = node(&api_url, "peer", "pw");
    db.insert_node(&peer_node).await.unwrap();

    let entry = fed
        .outbox
        .enqueue(&peer_node, "b1", "post", json!({ "type": "post", "federationId": "p1" }))
        .await
        .unwrap();

    // max_attempts is 3 in the test config
    let before = now_ms();
    let outcome = fed.outbox.attempt(&entry).await.unwrap();
    let AttemptOutcome::Retrying { next_attempt_at_ms } = outcome else {
        panic!("expected a retry, got {outcome:?}");
    };
    assert!(next_attempt_at_ms >= before + 5_000);

    // Not due yet, so a drain does nothing
    let report = fed.outbox.process_due(10).await.unwrap();
    assert_eq!(report.retried + report.delivered + report.dead, 0);

    let entry = db.get_outbox_entry(&entry.id).await.unwrap().unwrap();
    assert_eq!(entry.attempt_count, 1);
    assert!(matches!(
        fed.outbox.attempt(&entry).await.unwrap(),
        AttemptOutcome::Retrying { .. }
    ));
    let entry = db.get_outbox_entry(&entry.id).await.unwrap().unwrap();
    assert_eq!(fed.outbox.attempt(&entry).await.unwrap(), AttemptOutcome::Dead);

    let dead = db.get_outbox_entry(&entry.id).await.unwrap().unwrap();
    assert_eq!(dead.state, OutboxState::Dead);
    assert_eq!(dead.attempt_count, 3);
    assert!(dead.last_error.is_some());
    assert_eq!(peer.posts_to("/api/authors/b1/inbox").len(), 3);

    // Operator requeues once the peer is healthy again
    peer.set_inbox_status(201);
    assert_eq!(fed.outbox.requeue_dead().await.unwrap(), 1);
    let report = fed.outbox.process_due(10).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(db.get_outbox_entry(&entry.id).await.unwrap().is_none());
    assert_eq!(db.outbox_stats().await.unwrap().dead, 0);
}

#[tokio::test]
async fn fresh_entry_belongs_to_the_inline_attempt() {
    let peer = MockPeer::new();
    let api_url = peer.spawn().await;

    let db = common::db();
    let fed = common::federation(&db);
    let peer_node = node(&api_url, "peer", "pw");
    db.insert_node(&peer_node).await.unwrap();

    let before = now_ms();
    let entry = fed
        .outbox
        .enqueue(&peer_node, "b1", "comment", json!({ "type": "comment" }))
        .await
        .unwrap();
    assert!(entry.next_attempt_at_ms >= before + 5_000);

    // A drain racing the inline attempt leaves the entry alone
    let report = fed.outbox.process_due(10).await.unwrap();
    assert_eq!(report.retried + report.delivered + report.dead, 0);
    assert!(peer.posts_to("/api/authors/b1/inbox").is_empty());

    assert_eq!(fed.outbox.attempt(&entry).await.unwrap(), AttemptOutcome::Delivered);
    assert_eq!(peer.posts_to("/api/authors/b1/inbox").len(), 1);
}

#[tokio::test]
async fn worker_drains_due_entries_and_stops_on_notify() {
    let peer = MockPeer::new();
    let api_url = peer.spawn().await;

    let db = common::db();
    let fed = common::federation(&db);
    let peer_node = node(&api_url, "peer", "pw");
    db.insert_node(&peer_node).await.unwrap();
    // As left behind by an inline attempt that failed once
    db.enqueue_outbox(&OutboxEntry {
        id: "o1".to_string(),
        node_id: peer_node.id.clone(),
        recipient_id: "b1".to_string(),
        kind: "like".to_string(),
        payload: json!({ "type": "Like" }),
        attempt_count: 1,
        next_attempt_at_ms: now_ms(),
        last_error: Some("503".to_string()),
        state: OutboxState::Pending,
        created_at_ms: now_ms(),
    })
    .await
    .unwrap();

    let shutdown = Arc::new(Notify::new());
    let outbox = Arc::clone(&fed.outbox);
    let worker_shutdown = Arc::clone(&shutdown);
    let worker = tokio::spawn(async move {
        outbox
            .run(Duration::from_millis(20), worker_shutdown)
            .await
    });

    let mut delivered = false;
    for _ in 0..100 {
        if db.outbox_stats().await.unwrap().pending == 0 {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(delivered, "worker never drained the outbox");
    assert_eq!(peer.posts_to("/api/authors/b1/inbox").len(), 1);

    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(2), worker)
        .await
        .expect("worker did not stop")
        .unwrap();
}
