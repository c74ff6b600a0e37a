// Wire format: JSON shapes exchanged with peer nodes.
//
// Inbound parsing is deliberately forgiving: every field goes through
// `lenient`, so a wrong-typed or null value becomes `None` instead of
// failing the whole payload. The resolver decides which missing fields are
// fatal. Outbound serialization always emits `version` and `federationId`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use super::ids;
use crate::db::models::{Author, Comment, CommentLike, FollowRequest, Post, PostLike};

/// Protocol version stamped on every payload we emit.
pub const FEDERATION_PROTOCOL_VERSION: u32 = 1;

/// JSON-LD context used when a like arrives without one.
pub const ACTIVITY_STREAMS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// Deserialize a field as `T`, mapping anything that doesn't fit to `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

// --- Inbound shapes ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAuthor {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub federation_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub host: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub github: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub profile_image: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub bio: Option<String>,
}

impl WireAuthor {
    /// Stable author id: `federationId`, else the tail of `id`, else of `url`.
    pub fn identity(&self) -> Option<String> {
        ids::explicit_or_trailing(self.federation_id.as_deref(), self.id.as_deref()).or_else(
            || {
                self.url
                    .as_deref()
                    .and_then(ids::trailing_segment)
                    .map(str::to_string)
            },
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePost {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub federation_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub content_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub categories: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient")]
    pub visibility: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub unlisted: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub origin: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub published: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub count: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub author: Option<WireAuthor>,
    /// Id (or URL) of the single reader of a PRIVATE post.
    #[serde(default, deserialize_with = "lenient")]
    pub private_recipient: Option<String>,
}

impl WirePost {
    pub fn identity(&self) -> Option<String> {
        ids::explicit_or_trailing(self.federation_id.as_deref(), self.id.as_deref())
    }

    pub fn recipient_identity(&self) -> Option<String> {
        ids::explicit_or_trailing(None, self.private_recipient.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireComment {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub federation_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub comment: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub content_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub published: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub author: Option<WireAuthor>,
    /// Explicit id of the commented post.
    #[serde(default, deserialize_with = "lenient")]
    pub post_id: Option<String>,
    /// URL of the commented post, as some peers send it.
    #[serde(default, deserialize_with = "lenient")]
    pub post: Option<String>,
}

impl WireComment {
    /// Comment id, only when the sender provided a string `id` or
    /// `federationId`. A missing id means the comment cannot be resolved.
    pub fn identity(&self) -> Option<String> {
        ids::explicit_or_trailing(self.federation_id.as_deref(), self.id.as_deref())
    }

    /// Id of the post this comment belongs to.
    pub fn target_post_id(&self) -> Option<String> {
        non_empty(self.post_id.as_deref())
            .or_else(|| self.id.as_deref().and_then(|u| ids::segment_after(u, "posts")))
            .or_else(|| {
                self.post.as_deref().and_then(|u| {
                    ids::segment_after(u, "posts").or_else(|| ids::trailing_segment(u))
                })
            })
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireLike {
    /// Stable cross-node id, when the sender provides one.
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub summary: Option<String>,
    #[serde(rename = "@context", default, deserialize_with = "lenient")]
    pub context: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub author: Option<WireAuthor>,
    /// URL of the liked post or comment.
    #[serde(default, deserialize_with = "lenient")]
    pub object: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub post_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub comment_id: Option<String>,
}

/// What a Like payload points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikeTarget {
    Post(String),
    Comment(String),
}

impl WireLike {
    /// Classify the like and extract the liked object's id.
    ///
    /// An explicit `commentId` or a `comments` segment in `object` makes it a
    /// comment like; otherwise it is a post like.
    pub fn target(&self) -> Option<LikeTarget> {
        let object = self.object.as_deref().unwrap_or("");
        let is_comment = non_empty(self.comment_id.as_deref()).is_some()
            || ids::segment_after(object, "comments").is_some();

        if is_comment {
            non_empty(self.comment_id.as_deref())
                .or_else(|| ids::segment_after(object, "comments"))
                .map(|id| LikeTarget::Comment(id.to_string()))
        } else {
            non_empty(self.post_id.as_deref())
                .or_else(|| ids::segment_after(object, "posts"))
                .map(|id| LikeTarget::Post(id.to_string()))
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFollow {
    #[serde(default, deserialize_with = "lenient")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub actor: Option<WireAuthor>,
    #[serde(default, deserialize_with = "lenient")]
    pub object: Option<WireAuthor>,
}

/// Listing envelopes seen in the wild. Peers disagree on the key.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing {
    Items { items: Vec<Value> },
    Data { data: Vec<Value> },
    Comments { comments: Vec<Value> },
    Likes { likes: Vec<Value> },
    Bare(Vec<Value>),
}

/// Unwrap a listing body into its entries, whatever the envelope.
/// Returns `None` when the body isn't a recognizable listing.
pub fn listing_items(body: Value) -> Option<Vec<Value>> {
    let listing: Listing = serde_json::from_value(body).ok()?;
    Some(match listing {
        Listing::Items { items } => items,
        Listing::Data { data } => data,
        Listing::Comments { comments } => comments,
        Listing::Likes { likes } => likes,
        Listing::Bare(entries) => entries,
    })
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

// --- Outbound serialization ---

/// Canonical URL of a post, given its author.
pub fn post_url(author: &Author, post_id: &str) -> String {
    format!("{}/posts/{}", author.url.trim_end_matches('/'), post_id)
}

/// Canonical URL of a comment, given the post's author.
pub fn comment_url(post_author: &Author, post_id: &str, comment_id: &str) -> String {
    format!("{}/comments/{}", post_url(post_author, post_id), comment_id)
}

pub fn author_to_wire(author: &Author) -> Value {
    let id = if author.url.is_empty() {
        author.id.clone()
    } else {
        author.url.clone()
    };
    json!({
        "type": "author",
        "version": FEDERATION_PROTOCOL_VERSION,
        "id": id,
        "federationId": author.id,
        "url": author.url,
        "host": author.host,
        "displayName": author.display_name,
        "github": author.github,
        "profileImage": author.profile_image,
        "bio": author.bio,
    })
}

pub fn post_to_wire(post: &Post, author: &Author) -> Value {
    let url = post_url(author, &post.id);
    json!({
        "type": "post",
        "version": FEDERATION_PROTOCOL_VERSION,
        "id": url,
        "federationId": post.id,
        "title": post.title,
        "source": post.source,
        "origin": post.origin,
        "description": post.description,
        "contentType": post.content_type,
        "content": post.content,
        "author": author_to_wire(author),
        "categories": post.categories,
        "count": post.count,
        "comments": format!("{url}/comments"),
        "published": post.published.to_rfc3339(),
        "visibility": post.visibility.as_str(),
        "unlisted": post.unlisted,
        "privateRecipient": post.private_recipient_id,
    })
}

pub fn comment_to_wire(comment: &Comment, author: &Author, post_author: &Author) -> Value {
    json!({
        "type": "comment",
        "version": FEDERATION_PROTOCOL_VERSION,
        "id": comment_url(post_author, &comment.post_id, &comment.id),
        "federationId": comment.id,
        "postId": comment.post_id,
        "author": author_to_wire(author),
        "comment": comment.comment,
        "contentType": comment.content_type,
        "published": comment.published.to_rfc3339(),
    })
}

pub fn post_like_to_wire(like: &PostLike, author: &Author, post_author: &Author) -> Value {
    json!({
        "type": "Like",
        "version": FEDERATION_PROTOCOL_VERSION,
        "id": like.external_id.as_deref().unwrap_or(&like.id),
        "@context": like.context,
        "summary": like.summary,
        "author": author_to_wire(author),
        "object": post_url(post_author, &like.post_id),
        "postId": like.post_id,
    })
}

pub fn comment_like_to_wire(
    like: &CommentLike,
    author: &Author,
    comment: &Comment,
    post_author: &Author,
) -> Value {
    json!({
        "type": "Like",
        "version": FEDERATION_PROTOCOL_VERSION,
        "id": like.external_id.as_deref().unwrap_or(&like.id),
        "@context": like.context,
        "summary": like.summary,
        "author": author_to_wire(author),
        "object": comment_url(post_author, &comment.post_id, &comment.id),
        "commentId": comment.id,
        "postId": comment.post_id,
    })
}

pub fn follow_to_wire(request: &FollowRequest, actor: &Author, object: &Author) -> Value {
    json!({
        "type": "Follow",
        "version": FEDERATION_PROTOCOL_VERSION,
        "federationId": request.id,
        "summary": request.summary,
        "actor": author_to_wire(actor),
        "object": author_to_wire(object),
    })
}
