// Federation scenarios: local actions flowing out to a mock peer node.
//
// Each test gets its own in-memory store and its own peer bound to an
// ephemeral port, so they run independently.

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::json;

use grapevine::actions;
use grapevine::db::models::{OutboxState, Visibility};
use grapevine::error::FederationError;
use grapevine::federation::wire::{WireAuthor, WirePost};
use grapevine::federation::DeliveryOutcome;

use common::{local_author, new_post, node, remote_author, MockPeer};

// ============================================================
// Authors
// ============================================================

#[tokio::test]
async fn registered_authors_live_under_the_public_url() {
    let db = common::db();
    let fed = common::federation(&db);

    let author = actions::register_author(
        &fed,
        actions::NewAuthor {
            display_name: "  Alice ".to_string(),
            github: Some("https://github.com/alice".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(author.display_name, "Alice");
    assert_eq!(author.url, format!("{}/authors/{}", common::PUBLIC_URL, author.id));
    assert!(author.is_local);
    assert_eq!(db.list_local_authors().await.unwrap().len(), 1);

    let err = actions::register_author(
        &fed,
        actions::NewAuthor {
            display_name: "Mallory".to_string(),
            github: Some("https://gitlab.com/mallory".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FederationError::Validation(_)));
}

// ============================================================
// Follow requests
// ============================================================

#[tokio::test]
async fn refused_remote_follow_is_rolled_back() {
    let peer = MockPeer::new();
    peer.set_inbox_status(500);
    let api_url = peer.spawn().await;

    let db = common::db();
    let fed = common::federation(&db);
    db.insert_author(&local_author("a1", "Alice")).await.unwrap();
    db.insert_author(&remote_author("b1", "Bob", &api_url)).await.unwrap();
    db.insert_node(&node(&api_url, "peer", "pw")).await.unwrap();

    let (request, outcome) = actions::follow(&fed, "a1", "b1").await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Failed);
    assert!(db.get_follow_request(&request.id).await.unwrap().is_none());
    assert!(!db.is_following("a1", "b1").await.unwrap());

    let sent = peer.posts_to("/api/authors/b1/inbox");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "Follow");
    assert_eq!(sent[0]["summary"], "Alice wants to follow Bob");
}

#[tokio::test]
async fn accepted_remote_follow_stays_pending_until_reconciled() {
    let peer = MockPeer::new();
    let api_url = peer.spawn().await;

    let db = common::db();
    let fed = common::federation(&db);
    db.insert_author(&local_author("a1", "Alice")).await.unwrap();
    db.insert_author(&remote_author("b1", "Bob", &api_url)).await.unwrap();
    db.insert_node(&node(&api_url, "peer", "pw")).await.unwrap();

    let (request, outcome) = actions::follow(&fed, "a1", "b1").await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Sent);
    assert!(db.get_follow_request(&request.id).await.unwrap().is_some());

    // Outbound calls carry our node credentials
    let expected = format!("Basic {}", STANDARD.encode("local-test:outbound-pw"));
    let received = peer.received();
    assert_eq!(received[0].authorization.as_deref(), Some(expected.as_str()));

    // A second request for the same pair returns the first untouched
    let (again, outcome) = actions::follow(&fed, "a1", "b1").await.unwrap();
    assert_eq!(again.id, request.id);
    assert_eq!(outcome, DeliveryOutcome::Skipped);
    assert_eq!(peer.posts_to("/api/authors/b1/inbox").len(), 1);
}

#[tokio::test]
async fn self_follow_is_refused() {
    let db = common::db();
    let fed = common::federation(&db);
    db.insert_author(&local_author("a1", "Alice")).await.unwrap();

    let err = actions::follow(&fed, "a1", "a1").await.unwrap_err();
    assert!(matches!(err, FederationError::Validation(_)));
}

#[tokio::test]
async fn local_follow_accept_and_decline() {
    let db = common::db();
    let fed = common::federation(&db);
    db.insert_author(&local_author("a1", "Alice")).await.unwrap();
    db.insert_author(&local_author("a2", "Carol")).await.unwrap();
    db.insert_author(&local_author("a3", "Dave")).await.unwrap();

    let (request, outcome) = actions::follow(&fed, "a1", "a2").await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::LocalInbox);
    assert_eq!(db.list_incoming_follow_requests("a2").await.unwrap().len(), 1);

    // Only the target may answer
    let err = actions::accept_follow_request(&fed, "a3", &request.id)
        .await
        .unwrap_err();
    assert!(matches!(err, FederationError::Unauthorized));

    actions::accept_follow_request(&fed, "a2", &request.id)
        .await
        .unwrap();
    assert!(db.is_following("a1", "a2").await.unwrap());
    assert!(db.get_follow_request(&request.id).await.unwrap().is_none());

    let (request, _) = actions::follow(&fed, "a3", "a2").await.unwrap();
    actions::decline_follow_request(&fed, "a2", &request.id)
        .await
        .unwrap();
    assert!(!db.is_following("a3", "a2").await.unwrap());

    assert!(actions::unfollow(&fed, "a1", "a2").await.unwrap());
    assert!(!actions::unfollow(&fed, "a1", "a2").await.unwrap());
}

// ============================================================
// Follow reconciliation
// ============================================================

#[tokio::test]
async fn reconcile_confirms_once() {
    let peer = MockPeer::new();
    let api_url = peer.spawn().await;
    peer.respond(
        "/api/authors/b1/followers/a1",
        200,
        json!({ "isFollower": true }),
    );

    let db = common::db();
    let fed = common::federation(&db);
    db.insert_author(&local_author("a1", "Alice")).await.unwrap();
    db.insert_author(&remote_author("b1", "Bob", &api_url)).await.unwrap();
    db.insert_node(&node(&api_url, "peer", "pw")).await.unwrap();
    actions::follow(&fed, "a1", "b1").await.unwrap();

    let first = fed.reconcile_follows("a1").await.unwrap();
    assert_eq!(first.confirmed, 1);
    assert!(db.is_following("a1", "b1").await.unwrap());

    let second = fed.reconcile_follows("a1").await.unwrap();
    assert_eq!(second.confirmed, 0);
    assert_eq!(second.pending, 0);
    assert_eq!(db.get_followers("b1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn reconcile_leaves_unconfirmed_requests_pending() {
    let peer = MockPeer::new();
    let api_url = peer.spawn().await;
    // b1: 404 (no canned response). b2: explicit false. b3: server error.
    peer.respond(
        "/api/authors/b2/followers/a1",
        200,
        json!({ "isFollower": false }),
    );
    peer.respond("/api/authors/b3/followers/a1", 500, json!({}));

    let db = common::db();
    let fed = common::federation(&db);
    db.insert_author(&local_author("a1", "Alice")).await.unwrap();
    for id in ["b1", "b2", "b3"] {
        db.insert_author(&remote_author(id, id, &api_url)).await.unwrap();
    }
    db.insert_node(&node(&api_url, "peer", "pw")).await.unwrap();
    for id in ["b1", "b2", "b3"] {
        actions::follow(&fed, "a1", id).await.unwrap();
    }

    let report = fed.reconcile_follows("a1").await.unwrap();
    assert_eq!(report.confirmed, 0);
    assert_eq!(report.pending, 2);
    assert_eq!(report.unreachable, 1);
    assert_eq!(db.list_outgoing_follow_requests("a1").await.unwrap().len(), 3);
}

// ============================================================
// Publishing posts
// ============================================================

#[tokio::test]
async fn public_post_reaches_local_followers_without_http() {
    let db = common::db();
    let fed = common::federation(&db);
    db.insert_author(&local_author("a1", "Alice")).await.unwrap();
    db.insert_author(&local_author("a2", "Carol")).await.unwrap();
    db.insert_author(&local_author("a3", "Dave")).await.unwrap();
    db.add_following("a2", "a1").await.unwrap();
    db.add_following("a3", "a1").await.unwrap();

    let report = actions::create_post(&fed, new_post("a1", Visibility::Public), None)
        .await
        .unwrap();
    assert_eq!(report.deliveries.len(), 2);
    assert!(report
        .deliveries
        .iter()
        .all(|(_, outcome)| *outcome == DeliveryOutcome::LocalInbox));

    for follower in ["a2", "a3"] {
        let inbox = db.list_inbox(follower).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].id, report.post.id);
    }
    assert_eq!(
        report.post.source,
        format!("{}/authors/a1/posts/{}", common::PUBLIC_URL, report.post.id)
    );
}

#[tokio::test]
async fn private_post_needs_exactly_one_recipient() {
    let db = common::db();
    let fed = common::federation(&db);
    db.insert_author(&local_author("a1", "Alice")).await.unwrap();
    db.insert_author(&local_author("a2", "Carol")).await.unwrap();
    db.insert_author(&local_author("a3", "Dave")).await.unwrap();
    db.add_following("a3", "a1").await.unwrap();

    let err = actions::create_post(&fed, new_post("a1", Visibility::Private), None)
        .await
        .unwrap_err();
    assert!(matches!(err, FederationError::Validation(_)));

    let err = actions::create_post(&fed, new_post("a1", Visibility::Public), Some("a2"))
        .await
        .unwrap_err();
    assert!(matches!(err, FederationError::Validation(_)));

    let report = actions::create_post(&fed, new_post("a1", Visibility::Private), Some("a2"))
        .await
        .unwrap();
    assert_eq!(report.post.private_recipient_id.as_deref(), Some("a2"));
    assert_eq!(report.deliveries, vec![("a2".to_string(), DeliveryOutcome::LocalInbox)]);
    // The follower who isn't the recipient gets nothing
    assert!(db.list_inbox("a3").await.unwrap().is_empty());
}

#[tokio::test]
async fn post_to_remote_follower_is_sent_with_federation_id() {
    let peer = MockPeer::new();
    let api_url = peer.spawn().await;

    let db = common::db();
    let fed = common::federation(&db);
    db.insert_author(&local_author("a1", "Alice")).await.unwrap();
    db.insert_author(&remote_author("b1", "Bob", &api_url)).await.unwrap();
    db.insert_node(&node(&api_url, "peer", "pw")).await.unwrap();
    db.add_following("b1", "a1").await.unwrap();

    let report = actions::create_post(&fed, new_post("a1", Visibility::Public), None)
        .await
        .unwrap();
    assert_eq!(report.deliveries, vec![("b1".to_string(), DeliveryOutcome::Sent)]);

    let sent = peer.posts_to("/api/authors/b1/inbox");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "post");
    assert_eq!(sent[0]["version"], 1);
    assert_eq!(sent[0]["federationId"], report.post.id.as_str());
    assert_eq!(sent[0]["author"]["federationId"], "a1");
    // Delivered entries leave the outbox
    assert_eq!(db.outbox_stats().await.unwrap().pending, 0);
}

#[tokio::test]
async fn failed_post_delivery_is_queued_not_rolled_back() {
    let peer = MockPeer::new();
    peer.set_inbox_status(503);
    let api_url = peer.spawn().await;

    let db = common::db();
    let fed = common::federation(&db);
    db.insert_author(&local_author("a1", "Alice")).await.unwrap();
    db.insert_author(&remote_author("b1", "Bob", &api_url)).await.unwrap();
    db.insert_node(&node(&api_url, "peer", "pw")).await.unwrap();
    db.add_following("b1", "a1").await.unwrap();

    let report = actions::create_post(&fed, new_post("a1", Visibility::Public), None)
        .await
        .unwrap();
    assert_eq!(report.deliveries, vec![("b1".to_string(), DeliveryOutcome::Queued)]);
    assert!(db.get_post(&report.post.id).await.unwrap().is_some());

    let pending = db.list_outbox(OutboxState::Pending, 10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempt_count, 1);
    assert!(pending[0].last_error.as_deref().unwrap().contains("503"));
}

#[tokio::test]
async fn published_posts_resolve_identically_on_another_node() {
    const RECEIVER_API: &str = "http://receiver.test/api";

    let sender_db = common::db();
    let sender = common::federation(&sender_db);
    sender_db.insert_author(&local_author("a1", "Alice")).await.unwrap();
    sender_db
        .insert_author(&remote_author("b1", "Bob", RECEIVER_API))
        .await
        .unwrap();

    let receiver_db = common::db();
    let receiver = common::federation(&receiver_db);
    receiver_db.insert_author(&local_author("b1", "Bob")).await.unwrap();

    let mut unlisted = new_post("a1", Visibility::Public);
    unlisted.unlisted = true;
    unlisted.categories = vec!["fruit".to_string(), "vines".to_string()];
    let cases = [
        (unlisted, None),
        (new_post("a1", Visibility::FriendsOnly), None),
        (new_post("a1", Visibility::Private), Some("b1")),
    ];

    for (draft, recipient) in cases {
        let original = actions::create_post(&sender, draft, recipient)
            .await
            .unwrap()
            .post;
        let alice = sender_db.get_author("a1").await.unwrap().unwrap();
        let payload = grapevine::federation::wire::post_to_wire(&original, &alice);

        let wire_post: WirePost = serde_json::from_value(payload.clone()).unwrap();
        let wire_author: WireAuthor = serde_json::from_value(payload["author"].clone()).unwrap();
        let author = receiver.resolver.resolve_author(&wire_author).await.unwrap();
        let copy = receiver.resolver.resolve_post(&wire_post, &author).await.unwrap();

        assert_eq!(copy, original, "{:?} post changed in transit", original.visibility);
        if let Some(reader) = recipient {
            assert!(grapevine::visibility::can_view(&copy, Some(reader), &[]));
        }
    }
}

// ============================================================
// Likes and comments
// ============================================================

#[tokio::test]
async fn liking_twice_keeps_one_like_and_one_notification() {
    let db = common::db();
    let fed = common::federation(&db);
    db.insert_author(&local_author("a1", "Alice")).await.unwrap();
    db.insert_author(&local_author("a2", "Carol")).await.unwrap();
    let report = actions::create_post(&fed, new_post("a1", Visibility::Public), None)
        .await
        .unwrap();

    let (first, outcome) = actions::like_post(&fed, "a2", &report.post.id).await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Notified);
    let (second, outcome) = actions::like_post(&fed, "a2", &report.post.id).await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Skipped);
    assert_eq!(first.id, second.id);

    assert_eq!(db.list_post_likes(&report.post.id).await.unwrap().len(), 1);
    let notifications = db.list_notifications("a1").await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].message, "Carol liked your post");
}

#[tokio::test]
async fn hidden_posts_cannot_be_liked_or_commented() {
    let db = common::db();
    let fed = common::federation(&db);
    db.insert_author(&local_author("a1", "Alice")).await.unwrap();
    db.insert_author(&local_author("a2", "Carol")).await.unwrap();
    let report = actions::create_post(&fed, new_post("a1", Visibility::FriendsOnly), None)
        .await
        .unwrap();

    let err = actions::like_post(&fed, "a2", &report.post.id).await.unwrap_err();
    assert!(matches!(err, FederationError::NotFound(_)));
    let err = actions::comment_on_post(&fed, "a2", &report.post.id, "hi", "text/plain")
        .await
        .unwrap_err();
    assert!(matches!(err, FederationError::NotFound(_)));

    // Following makes it visible
    db.add_following("a2", "a1").await.unwrap();
    actions::like_post(&fed, "a2", &report.post.id).await.unwrap();
}

#[tokio::test]
async fn comment_on_remote_post_goes_to_its_node() {
    let peer = MockPeer::new();
    let api_url = peer.spawn().await;

    let db = common::db();
    let fed = common::federation(&db);
    db.insert_author(&local_author("a1", "Alice")).await.unwrap();
    let bob = remote_author("b1", "Bob", &api_url);
    db.insert_author(&bob).await.unwrap();
    db.insert_node(&node(&api_url, "peer", "pw")).await.unwrap();

    peer.respond(
        "/api/authors/b1/posts/p9",
        200,
        json!({
            "type": "post",
            "id": format!("{}/posts/p9", bob.url),
            "title": "Remote",
            "content": null,
            "visibility": "PUBLIC",
            "author": { "id": bob.url, "displayName": "Bob" },
        }),
    );
    let post = fed.fetch_remote_post(&bob, "p9").await.unwrap();
    assert_eq!(post.id, "p9");
    assert_eq!(post.author_id, "b1");

    let (comment, outcome) = actions::comment_on_post(&fed, "a1", "p9", "Nice", "text/plain")
        .await
        .unwrap();
    assert_eq!(outcome, DeliveryOutcome::Sent);

    let sent = peer.posts_to("/api/authors/b1/inbox");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "comment");
    assert_eq!(sent[0]["federationId"], comment.id.as_str());
    assert_eq!(sent[0]["postId"], "p9");
}
