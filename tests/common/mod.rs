// Shared fixtures for integration tests: an in-memory store, a Federation
// wired to it, and a throwaway axum "peer node" that records what it receives.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::{json, Value};

use grapevine::config::Config;
use grapevine::db::models::{Author, NewPost, Node, Visibility};
use grapevine::db::{Database, SqliteDatabase};
use grapevine::federation::Federation;
use grapevine::web::auth::hash_secret;

pub const PUBLIC_URL: &str = "http://local.test";

pub fn config() -> Config {
    Config {
        db_path: ":memory:".to_string(),
        public_url: PUBLIC_URL.to_string(),
        http_timeout: Duration::from_secs(2),
        outbox_max_attempts: 3,
        outbox_interval: Duration::from_secs(1),
    }
}

pub fn db() -> Arc<dyn Database> {
    Arc::new(SqliteDatabase::in_memory().unwrap())
}

pub fn federation(db: &Arc<dyn Database>) -> Federation {
    Federation::new(Arc::clone(db), &config()).unwrap()
}

pub fn local_author(id: &str, name: &str) -> Author {
    Author {
        id: id.to_string(),
        url: format!("{PUBLIC_URL}/authors/{id}"),
        host: PUBLIC_URL.to_string(),
        display_name: name.to_string(),
        github: None,
        profile_image: "https://i.imgur.com/k7XVwpB.jpeg".to_string(),
        bio: String::new(),
        is_local: true,
        is_active: true,
    }
}

/// A shadow author living on the node whose API is at `api_url`.
pub fn remote_author(id: &str, name: &str, api_url: &str) -> Author {
    let base = api_url.trim_end_matches("/api");
    Author {
        id: id.to_string(),
        url: format!("{base}/authors/{id}"),
        host: base.to_string(),
        display_name: name.to_string(),
        github: None,
        profile_image: "https://i.imgur.com/k7XVwpB.jpeg".to_string(),
        bio: String::new(),
        is_local: false,
        is_active: false,
    }
}

pub fn new_post(author_id: &str, visibility: Visibility) -> NewPost {
    NewPost {
        author_id: author_id.to_string(),
        title: "Grapes".to_string(),
        description: "on the vine".to_string(),
        content: "They are ripe.".to_string(),
        content_type: "text/plain".to_string(),
        categories: vec!["fruit".to_string()],
        visibility,
        unlisted: false,
    }
}

/// Node row for a peer at `api_url`. The peer calls us as
/// `inbound_user` / `inbound_secret`.
pub fn node(api_url: &str, inbound_user: &str, inbound_secret: &str) -> Node {
    Node {
        id: format!("node-{inbound_user}"),
        node_name: "local-test".to_string(),
        node_cred: "outbound-pw".to_string(),
        api_url: api_url.to_string(),
        host: grapevine::federation::ids::normalize_host(api_url),
        inbound_username: inbound_user.to_string(),
        inbound_secret_hash: hash_secret(inbound_secret),
    }
}

// --- Mock peer node ---

#[derive(Debug, Clone)]
pub struct Received {
    pub method: Method,
    pub path: String,
    pub body: Value,
    pub authorization: Option<String>,
}

/// A peer that records every request. GETs are answered from canned
/// responses (404 when none is set); POSTs get `inbox_status`.
#[derive(Clone)]
pub struct MockPeer {
    received: Arc<Mutex<Vec<Received>>>,
    responses: Arc<Mutex<HashMap<String, (u16, Value)>>>,
    inbox_status: Arc<AtomicU16>,
}

impl MockPeer {
    pub fn new() -> Self {
        Self {
            received: Arc::default(),
            responses: Arc::default(),
            inbox_status: Arc::new(AtomicU16::new(201)),
        }
    }

    pub fn respond(&self, path: &str, status: u16, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body));
    }

    pub fn set_inbox_status(&self, status: u16) {
        self.inbox_status.store(status, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    pub fn posts_to(&self, path: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|r| r.method == Method::POST && r.path == path)
            .map(|r| r.body)
            .collect()
    }

    /// Bind on 127.0.0.1:0 and serve in the background. Returns the api_url.
    pub async fn spawn(&self) -> String {
        let app = Router::new().fallback(record).with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/api")
    }
}

async fn record(
    State(peer): State<MockPeer>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    peer.received.lock().unwrap().push(Received {
        method: method.clone(),
        path: path.clone(),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });

    let canned = peer.responses.lock().unwrap().get(&path).cloned();
    if let Some((status, body)) = canned {
        let status = StatusCode::from_u16(status).unwrap();
        return (status, axum::Json(body)).into_response();
    }
    if method == Method::POST {
        let status = StatusCode::from_u16(peer.inbox_status.load(Ordering::SeqCst)).unwrap();
        return (status, axum::Json(json!({}))).into_response();
    }
    (StatusCode::NOT_FOUND, axum::Json(json!({ "error": "not found" }))).into_response()
}
