// Inbox and peer read endpoints, driven through the router with oneshot.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use tower::ServiceExt;

use grapevine::db::models::{Post, Visibility};
use grapevine::db::Database;
use grapevine::web::{build_router, AppState};

use common::{local_author, node, remote_author};

const PEER_API: &str = "http://peer.test/api";

async fn setup() -> (Router, Arc<dyn Database>) {
    let db = common::db();
    db.insert_author(&local_author("a1", "Alice")).await.unwrap();
    db.insert_author(&remote_author("b1", "Bob", PEER_API)).await.unwrap();
    db.insert_node(&node(PEER_API, "peer", "pw")).await.unwrap();
    let state = AppState::new(common::config(), Arc::clone(&db)).unwrap();
    (build_router(state), db)
}

fn post(id: &str, author_id: &str, visibility: Visibility) -> Post {
    Post {
        id: id.to_string(),
        author_id: author_id.to_string(),
        title: "Hello".to_string(),
        description: String::new(),
        content: "body".to_string(),
        content_type: "text/plain".to_string(),
        categories: vec![],
        visibility,
        unlisted: false,
        private_recipient_id: (visibility == Visibility::Private).then(|| "a1".to_string()),
        source: String::new(),
        origin: String::new(),
        published: chrono::Utc::now(),
        count: 0,
    }
}

fn bob() -> Value {
    json!({
        "type": "author",
        "id": "http://peer.test/authors/b1",
        "host": "http://peer.test",
        "displayName": "Bob",
    })
}

fn basic(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, basic("peer", "pw"))
        .body(Body::empty())
        .unwrap()
}

fn deliver(recipient: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/authors/{recipient}/inbox"))
        .header(header::AUTHORIZATION, basic("peer", "pw"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

// ============================================================
// Authentication
// ============================================================

#[tokio::test]
async fn requests_without_valid_node_credentials_get_401() {
    let (app, _db) = setup().await;

    let anonymous = Request::builder()
        .uri("/api/authors")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, anonymous).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong_password = Request::builder()
        .uri("/api/authors")
        .header(header::AUTHORIZATION, basic("peer", "nope"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, wrong_password).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let unknown_node = Request::builder()
        .method("POST")
        .uri("/api/authors/a1/inbox")
        .header(header::AUTHORIZATION, basic("stranger", "pw"))
        .body(Body::from(json!({ "type": "Follow" }).to_string()))
        .unwrap();
    let (status, _) = send(&app, unknown_node).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_is_open() {
    let (app, _db) = setup().await;
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

// ============================================================
// Malformed deliveries
// ============================================================

#[tokio::test]
async fn unknown_type_and_bad_bodies_get_400() {
    let (app, db) = setup().await;
    db.insert_post(&post("p1", "a1", Visibility::Public)).await.unwrap();

    let (status, _) = send(&app, deliver("a1", json!({ "type": "Announce" }).to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, deliver("a1", json!(["post"]).to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, deliver("a1", "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The liked post exists, but the author has no usable id
    let like = json!({ "type": "Like", "author": { "displayName": "?" }, "postId": "p1" });
    let (status, _) = send(&app, deliver("a1", like.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(db.list_post_likes("p1").await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_recipient_gets_404() {
    let (app, _db) = setup().await;
    let follow = json!({ "type": "Follow", "actor": bob(), "object": { "id": "ghost" } });
    let (status, _) = send(&app, deliver("ghost", follow.to_string())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn comment_on_unknown_post_gets_404() {
    let (app, db) = setup().await;
    let comment = json!({
        "type": "comment",
        "id": "http://peer.test/comments/c1",
        "postId": "missing",
        "comment": "hello?",
        "author": bob(),
    });
    let (status, _) = send(&app, deliver("a1", comment.to_string())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(db.get_comment("c1").await.unwrap().is_none());
}

// ============================================================
// Posts
// ============================================================

#[tokio::test]
async fn private_post_is_delivered_only_to_its_recipient() {
    let (app, db) = setup().await;
    db.insert_author(&local_author("a2", "Ann")).await.unwrap();
    db.insert_post(&post("p1", "b1", Visibility::Private)).await.unwrap();
    let mut elsewhere = post("p2", "b1", Visibility::Private);
    elsewhere.private_recipient_id = Some("a2".to_string());
    db.insert_post(&elsewhere).await.unwrap();

    // Addressed to a1: taken even though a1 does not follow Bob
    let payload = json!({
        "type": "post",
        "id": "http://peer.test/authors/b1/posts/p1",
        "visibility": "PRIVATE",
        "author": bob(),
    });
    let (status, body) = send(&app, deliver("a1", payload.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "delivered");

    // Addressed to a2: a1 gets nothing
    let payload = json!({
        "type": "post",
        "id": "http://peer.test/authors/b1/posts/p2",
        "visibility": "PRIVATE",
        "author": bob(),
    });
    let (status, body) = send(&app, deliver("a1", payload.to_string())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "discarded");

    let inbox = db.list_inbox("a1").await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].id, "p1");
}

#[tokio::test]
async fn public_post_from_unfollowed_sender_is_discarded() {
    let (app, db) = setup().await;
    db.insert_post(&post("p1", "b1", Visibility::Public)).await.unwrap();
    let payload = json!({ "type": "post", "federationId": "p1", "author": bob() });

    let (status, body) = send(&app, deliver("a1", payload.to_string())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "discarded");
    assert!(db.list_inbox("a1").await.unwrap().is_empty());

    db.add_following("a1", "b1").await.unwrap();
    let (status, body) = send(&app, deliver("a1", payload.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "delivered");
    assert_eq!(db.list_inbox("a1").await.unwrap()[0].id, "p1");
}

#[tokio::test]
async fn unknown_post_is_404() {
    let (app, db) = setup().await;

    // Posts are located, never created, by the inbox
    let payload = json!({ "type": "post", "federationId": "p404", "author": bob() });
    let (status, _) = send(&app, deliver("a1", payload.to_string())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(db.get_post("p404").await.unwrap().is_none());
}

// ============================================================
// Follow, Like, comment
// ============================================================

#[tokio::test]
async fn follow_creates_one_pending_request() {
    let (app, db) = setup().await;
    let follow = json!({
        "type": "Follow",
        "summary": "Bob wants to follow Alice",
        "actor": bob(),
        "object": { "id": "http://local.test/authors/a1" },
    });

    let (status, first) = send(&app, deliver("a1", follow.to_string())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["type"], "Follow");
    let (status, second) = send(&app, deliver("a1", follow.to_string())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["federationId"], second["federationId"]);

    let incoming = db.list_incoming_follow_requests("a1").await.unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].follower_id, "b1");
    assert_eq!(incoming[0].summary, "Bob wants to follow Alice");
}

#[tokio::test]
async fn follow_for_another_author_gets_400() {
    let (app, db) = setup().await;
    db.insert_author(&local_author("a2", "Ann")).await.unwrap();
    let follow = json!({
        "type": "Follow",
        "actor": bob(),
        "object": { "id": "http://local.test/authors/a2" },
    });

    let (status, _) = send(&app, deliver("a1", follow.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(db.list_incoming_follow_requests("a1").await.unwrap().is_empty());
    assert!(db.list_incoming_follow_requests("a2").await.unwrap().is_empty());
}

#[tokio::test]
async fn like_id_reused_on_another_post_gets_400() {
    let (app, db) = setup().await;
    db.insert_post(&post("p1", "a1", Visibility::Public)).await.unwrap();
    db.insert_post(&post("p2", "a1", Visibility::Public)).await.unwrap();
    let like = |post_id: &str| {
        json!({
            "type": "Like",
            "id": "http://peer.test/likes/l9",
            "author": bob(),
            "object": format!("http://local.test/authors/a1/posts/{post_id}"),
        })
    };

    let (status, _) = send(&app, deliver("a1", like("p1").to_string())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&app, deliver("a1", like("p2").to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(db.list_post_likes("p1").await.unwrap().len(), 1);
    assert!(db.list_post_likes("p2").await.unwrap().is_empty());
    assert_eq!(db.list_notifications("a1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn like_is_deduplicated_and_notifies() {
    let (app, db) = setup().await;
    db.insert_post(&post("p2", "a1", Visibility::Public)).await.unwrap();
    let like = json!({
        "type": "Like",
        "id": "http://peer.test/likes/l1",
        "author": bob(),
        "object": "http://local.test/authors/a1/posts/p2",
    });

    let (status, body) = send(&app, deliver("a1", like.to_string())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], "http://peer.test/likes/l1");
    assert_eq!(body["summary"], "Bob likes this");
    let (status, _) = send(&app, deliver("a1", like.to_string())).await;
    assert_eq!(status, StatusCode::CREATED);

    assert_eq!(db.list_post_likes("p2").await.unwrap().len(), 1);
    let notifications = db.list_notifications("a1").await.unwrap();
    assert!(notifications
        .iter()
        .all(|n| n.message == "Bob liked your post"));
}

#[tokio::test]
async fn like_on_comment_is_recognized_from_the_object_url() {
    let (app, db) = setup().await;
    db.insert_post(&post("p2", "a1", Visibility::Public)).await.unwrap();
    let comment = grapevine::db::models::Comment {
        id: "c7".to_string(),
        post_id: "p2".to_string(),
        author_id: "a1".to_string(),
        comment: "first".to_string(),
        content_type: "text/plain".to_string(),
        published: chrono::Utc::now(),
    };
    db.insert_comment_if_absent(&comment).await.unwrap();

    let like = json!({
        "type": "Like",
        "author": bob(),
        "object": "http://local.test/authors/a1/posts/p2/comments/c7",
    });
    let (status, body) = send(&app, deliver("a1", like.to_string())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["commentId"], "c7");
    assert_eq!(db.list_comment_likes("c7").await.unwrap().len(), 1);
    assert!(db.list_post_likes("p2").await.unwrap().is_empty());
    assert_eq!(
        db.list_notifications("a1").await.unwrap()[0].message,
        "Bob liked your comment"
    );
}

#[tokio::test]
async fn comment_is_stored_and_notifies_with_post_link() {
    let (app, db) = setup().await;
    db.insert_post(&post("p2", "a1", Visibility::Public)).await.unwrap();
    let comment = json!({
        "type": "comment",
        "id": "http://local.test/authors/a1/posts/p2/comments/c1",
        "comment": "Lovely",
        "contentType": "text/markdown",
        "author": bob(),
    });

    let (status, body) = send(&app, deliver("a1", comment.to_string())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["federationId"], "c1");

    let stored = db.get_comment("c1").await.unwrap().unwrap();
    assert_eq!(stored.post_id, "p2");
    assert_eq!(stored.author_id, "b1");
    assert_eq!(stored.content_type, "text/markdown");

    let notification = &db.list_notifications("a1").await.unwrap()[0];
    assert_eq!(notification.message, "Bob commented on your post");
    assert_eq!(notification.link, "http://local.test/authors/a1/posts/p2");
}

// ============================================================
// Read endpoints
// ============================================================

#[tokio::test]
async fn follower_check_and_listings() {
    let (app, db) = setup().await;
    db.add_following("b1", "a1").await.unwrap();

    let (status, body) = send(&app, get("/api/authors/a1/followers/b1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "isFollower": true }));
    let (_, body) = send(&app, get("/api/authors/a1/followers/nobody")).await;
    assert_eq!(body, json!({ "isFollower": false }));

    let (_, body) = send(&app, get("/api/authors")).await;
    assert_eq!(body["type"], "authors");
    // Only local authors are listed
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["items"][0]["federationId"], "a1");

    let (_, body) = send(&app, get("/api/authors/a1/followers")).await;
    assert_eq!(body["type"], "followers");
    assert_eq!(body["items"][0]["federationId"], "b1");

    let (status, _) = send(&app, get("/api/authors/b1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn only_public_posts_are_served_to_peers() {
    let (app, db) = setup().await;
    db.insert_post(&post("pub", "a1", Visibility::Public)).await.unwrap();
    db.insert_post(&post("friends", "a1", Visibility::FriendsOnly)).await.unwrap();

    let (status, body) = send(&app, get("/api/authors/a1/posts/pub")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["federationId"], "pub");

    let (status, body) = send(&app, get("/api/authors/a1/posts/pub/comments")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "type": "comments", "comments": [] }));

    let (status, body) = send(&app, get("/api/authors/a1/posts/pub/likes")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "likes");

    for path in [
        "/api/authors/a1/posts/friends",
        "/api/authors/a1/posts/friends/comments",
        "/api/authors/a1/posts/friends/likes",
        // Right post, wrong author
        "/api/authors/b1/posts/pub",
    ] {
        let (status, _) = send(&app, get(path)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{path}");
    }
}
