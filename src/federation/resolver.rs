// Remote object resolver: materialize foreign payloads as local rows.
//
// Every resolve_* call is get-or-create: the first sight of an id inserts a
// shadow record, later sights return the stored one unchanged. Inserts are
// single `ON CONFLICT DO NOTHING` statements, so concurrent deliveries that
// mention the same unseen author converge on one row.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, warn};

use super::ids;
use super::wire::{WireAuthor, WireComment, WireLike, WirePost, ACTIVITY_STREAMS_CONTEXT};
use crate::db::models::{
    Author, Comment, CommentLike, Post, PostLike, Visibility, DEFAULT_PROFILE_IMAGE,
};
use crate::db::queries::LikeConflict;
use crate::db::Database;
use crate::error::{FederationError, FederationResult};

/// Content stored for remote posts that arrive with `content: null`.
pub const EMPTY_CONTENT_PLACEHOLDER: &str = " ";

#[derive(Clone)]
pub struct Resolver {
    db: Arc<dyn Database>,
}

impl Resolver {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Find or create the author described by `payload`.
    pub async fn resolve_author(&self, payload: &WireAuthor) -> FederationResult<Author> {
        let id = payload
            .identity()
            .ok_or_else(|| FederationError::malformed("author payload has no usable id"))?;

        if let Some(existing) = self.db.get_author(&id).await? {
            return Ok(existing);
        }

        let url = payload.url.clone().unwrap_or_default();
        let host = payload
            .host
            .clone()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| ids::normalize_host(&url));

        let shadow = Author {
            id: id.clone(),
            url,
            host,
            display_name: payload.display_name.clone().unwrap_or_default(),
            github: payload.github.clone().filter(|g| !g.is_empty()),
            profile_image: payload
                .profile_image
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_PROFILE_IMAGE.to_string()),
            bio: payload.bio.clone().unwrap_or_default(),
            is_local: false,
            is_active: false,
        };

        let stored = self.db.insert_author_if_absent(&shadow).await?;
        debug!(author = %stored.id, host = %stored.host, "Resolved remote author");
        Ok(stored)
    }

    /// Find or create a post owned by the already-resolved `author`.
    pub async fn resolve_post(&self, payload: &WirePost, author: &Author) -> FederationResult<Post> {
        let id = payload
            .identity()
            .ok_or_else(|| FederationError::malformed("post payload has no usable id"))?;

        if let Some(existing) = self.db.get_post(&id).await? {
            return Ok(existing);
        }

        let visibility = match payload.visibility.as_deref() {
            None => Visibility::Public,
            Some(raw) => raw
                .parse::<Visibility>()
                .map_err(|e| FederationError::malformed(format!("post {id}: {e}")))?,
        };

        // A PRIVATE post only makes sense here if its one reader lives here
        let private_recipient_id = if visibility == Visibility::Private {
            let recipient_id = payload.recipient_identity().ok_or_else(|| {
                FederationError::malformed(format!("PRIVATE post {id} has no recipient"))
            })?;
            let recipient = self
                .db
                .get_author(&recipient_id)
                .await?
                .filter(|a| a.is_local)
                .ok_or_else(|| {
                    FederationError::malformed(format!(
                        "PRIVATE post {id} is addressed to {recipient_id}, who is not hosted here"
                    ))
                })?;
            Some(recipient.id)
        } else {
            None
        };

        let shadow = Post {
            id: id.clone(),
            author_id: author.id.clone(),
            title: payload.title.clone().unwrap_or_default(),
            description: payload.description.clone().unwrap_or_default(),
            content: payload
                .content
                .clone()
                .unwrap_or_else(|| EMPTY_CONTENT_PLACEHOLDER.to_string()),
            content_type: payload
                .content_type
                .clone()
                .unwrap_or_else(|| "text/plain".to_string()),
            categories: payload.categories.clone().unwrap_or_default(),
            visibility,
            unlisted: payload.unlisted.unwrap_or(false),
            private_recipient_id,
            source: payload.source.clone().unwrap_or_default(),
            origin: payload.origin.clone().unwrap_or_default(),
            published: parse_published(payload.published.as_deref()),
            count: payload.count.unwrap_or(0),
        };

        let stored = self.db.insert_post_if_absent(&shadow).await?;
        debug!(post = %stored.id, author = %author.id, "Resolved remote post");
        Ok(stored)
    }

    /// Find or create a comment on `post`.
    ///
    /// Returns `Ok(None)` when the payload has no usable id or its author
    /// can't be resolved: the comment is skipped, the caller carries on.
    pub async fn resolve_comment(
        &self,
        payload: &WireComment,
        post: &Post,
    ) -> FederationResult<Option<Comment>> {
        let Some(id) = payload.identity() else {
            warn!(post = %post.id, "Skipping remote comment without a string id");
            return Ok(None);
        };

        if let Some(existing) = self.db.get_comment(&id).await? {
            return Ok(Some(existing));
        }

        let author = match payload.author.as_ref() {
            Some(wire) => match self.resolve_author(wire).await {
                Ok(author) => author,
                Err(FederationError::Storage(e)) => return Err(FederationError::Storage(e)),
                Err(e) => {
                    warn!(comment = %id, error = %e, "Skipping remote comment, author unresolvable");
                    return Ok(None);
                }
            },
            None => {
                warn!(comment = %id, "Skipping remote comment without an author");
                return Ok(None);
            }
        };

        let shadow = Comment {
            id,
            post_id: post.id.clone(),
            author_id: author.id,
            comment: payload.comment.clone().unwrap_or_default(),
            content_type: payload
                .content_type
                .clone()
                .unwrap_or_else(|| "text/plain".to_string()),
            published: parse_published(payload.published.as_deref()),
        };

        let stored = self.db.insert_comment_if_absent(&shadow).await?;
        Ok(Some(stored))
    }

    /// Find or create a like on `post`. Deduplicated by the like's stable id
    /// when present, else by its summary text.
    pub async fn resolve_post_like(
        &self,
        payload: &WireLike,
        post: &Post,
    ) -> FederationResult<PostLike> {
        let (author, summary, context) = self.like_parts(payload).await?;
        let like = PostLike {
            id: uuid::Uuid::new_v4().to_string(),
            external_id: stable_like_id(payload),
            post_id: post.id.clone(),
            author_id: author.id,
            summary,
            context,
        };
        self.db
            .insert_post_like_if_absent(&like)
            .await
            .map_err(like_conflict)
    }

    pub async fn resolve_comment_like(
        &self,
        payload: &WireLike,
        comment: &Comment,
    ) -> FederationResult<CommentLike> {
        let (author, summary, context) = self.like_parts(payload).await?;
        let like = CommentLike {
            id: uuid::Uuid::new_v4().to_string(),
            external_id: stable_like_id(payload),
            comment_id: comment.id.clone(),
            author_id: author.id,
            summary,
            context,
        };
        self.db
            .insert_comment_like_if_absent(&like)
            .await
            .map_err(like_conflict)
    }

    /// Resolve the liking author and fill in summary/context defaults.
    async fn like_parts(&self, payload: &WireLike) -> FederationResult<(Author, String, String)> {
        let wire_author = payload
            .author
            .as_ref()
            .ok_or_else(|| FederationError::malformed("like payload has no author"))?;
        let author = self.resolve_author(wire_author).await?;

        let summary = payload
            .summary
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("{} likes this", author.display_name));
        let context = payload
            .context
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| ACTIVITY_STREAMS_CONTEXT.to_string());

        Ok((author, summary, context))
    }
}

fn stable_like_id(payload: &WireLike) -> Option<String> {
    payload
        .id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A stable like id reused for another object is the peer's mistake, not ours.
fn like_conflict(err: anyhow::Error) -> FederationError {
    match err.downcast_ref::<LikeConflict>() {
        Some(conflict) => FederationError::malformed(conflict),
        None => FederationError::Storage(err),
    }
}

/// RFC 3339, or a naive timestamp taken as UTC, or now.
fn parse_published(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return Utc::now();
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_utc();
    }
    debug!(published = raw, "Unparseable published timestamp, using now");
    Utc::now()
}
