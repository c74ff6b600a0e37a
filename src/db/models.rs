// Data models: Rust structs that map to database rows.
//
// These are the types that flow through the application. They're separate
// from the database queries so other modules can use them without depending
// on rusqlite directly.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Profile image used when a remote author arrives without one.
pub const DEFAULT_PROFILE_IMAGE: &str = "https://i.imgur.com/k7XVwpB.jpeg";

/// An author, either local to this node or a shadow of a remote author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub url: String,
    pub host: String,
    pub display_name: String,
    pub github: Option<String>,
    pub profile_image: String,
    pub bio: String,
    /// False for shadow records materialized from remote payloads.
    pub is_local: bool,
    /// Shadow authors are stored disabled; they can never sign in here.
    pub is_active: bool,
}

/// Who may read a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    Public,
    FriendsOnly,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "PUBLIC",
            Visibility::FriendsOnly => "FRIENDS_ONLY",
            Visibility::Private => "PRIVATE",
        }
    }
}

impl FromStr for Visibility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUBLIC" => Ok(Visibility::Public),
            "FRIENDS_ONLY" => Ok(Visibility::FriendsOnly),
            "PRIVATE" => Ok(Visibility::Private),
            other => anyhow::bail!("invalid post visibility: {other:?}"),
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A post, owned by exactly one author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub description: String,
    /// Text, markdown, or a base64-embedded image depending on content_type.
    pub content: String,
    pub content_type: String,
    pub categories: Vec<String>,
    pub visibility: Visibility,
    pub unlisted: bool,
    /// Required iff visibility is PRIVATE.
    pub private_recipient_id: Option<String>,
    pub source: String,
    pub origin: String,
    pub published: DateTime<Utc>,
    /// Comment count as last known (peers report their own).
    pub count: i64,
}

/// Input for publishing a local post. Ids, timestamps and provenance URLs
/// are assigned on publish.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewPost {
    pub author_id: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub content_type: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub visibility: Visibility,
    #[serde(default)]
    pub unlisted: bool,
}

/// A comment attached to one post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub comment: String,
    pub content_type: String,
    pub published: DateTime<Utc>,
}

/// An author's like on a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostLike {
    pub id: String,
    /// Stable cross-node id when the sender supplied one. Likes without it
    /// are deduplicated by summary text.
    pub external_id: Option<String>,
    pub post_id: String,
    pub author_id: String,
    pub summary: String,
    pub context: String,
}

/// An author's like on a comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentLike {
    pub id: String,
    pub external_id: Option<String>,
    pub comment_id: String,
    pub author_id: String,
    pub summary: String,
    pub context: String,
}

/// A pending follow from `follower_id` to `following_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowRequest {
    pub id: String,
    pub summary: String,
    pub follower_id: String,
    pub following_id: String,
}

/// A registered peer node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// Outbound basic-auth username (what we present to the peer).
    pub node_name: String,
    /// Outbound basic-auth password.
    #[serde(skip_serializing)]
    pub node_cred: String,
    pub api_url: String,
    /// Normalized host (see `federation::ids::normalize_host`).
    pub host: String,
    /// Username the peer presents when calling us.
    pub inbound_username: String,
    /// SHA-256 hex digest of the password the peer presents when calling us.
    #[serde(skip_serializing)]
    pub inbound_secret_hash: String,
}

/// Author-facing event, created when a remote like or comment arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub author_id: String,
    pub message: String,
    pub link: String,
    pub created_at: String,
}

/// Notification descriptor used as a local-delivery fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub author_id: String,
    pub message: String,
    pub link: String,
}

/// Outbox entry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxState {
    Pending,
    Dead,
}

impl OutboxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxState::Pending => "pending",
            OutboxState::Dead => "dead",
        }
    }
}

impl FromStr for OutboxState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxState::Pending),
            "dead" => Ok(OutboxState::Dead),
            other => anyhow::bail!("invalid outbox state: {other:?}"),
        }
    }
}

/// A remote delivery waiting to be (re)attempted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: String,
    pub node_id: String,
    pub recipient_id: String,
    /// post | comment | like | follow
    pub kind: String,
    pub payload: serde_json::Value,
    pub attempt_count: i64,
    pub next_attempt_at_ms: i64,
    pub last_error: Option<String>,
    pub state: OutboxState,
    pub created_at_ms: i64,
}

/// Aggregate outbox counts for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub pending: i64,
    pub dead: i64,
}

/// Row counts shown by `grapevine status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub local_authors: i64,
    pub shadow_authors: i64,
    pub posts: i64,
    pub comments: i64,
    pub likes: i64,
    pub follow_requests: i64,
    pub nodes: i64,
}
