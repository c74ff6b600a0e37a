// Local actions: the entry points for things local authors do.
//
// These are what a CRUD layer calls after it has authenticated the acting
// author. Each one updates the store and hands any cross-author effect to
// the dispatcher.

use serde::Deserialize;
use tracing::info;

use crate::db::models::{
    Author, Comment, CommentLike, FollowRequest, NewNotification, NewPost, PostLike,
    DEFAULT_PROFILE_IMAGE,
};
use crate::error::{FederationError, FederationResult};
use crate::federation::dispatcher::PublishReport;
use crate::federation::wire::{self, ACTIVITY_STREAMS_CONTEXT};
use crate::federation::{Deliverable, DeliveryOutcome, Federation};
use crate::visibility::can_view;

/// Profile fields for a new local author.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAuthor {
    pub display_name: String,
    pub github: Option<String>,
    pub profile_image: Option<String>,
    #[serde(default)]
    pub bio: String,
}

/// Create a local author with a fresh id under this node's public URL.
pub async fn register_author(fed: &Federation, new: NewAuthor) -> FederationResult<Author> {
    if new.display_name.trim().is_empty() {
        return Err(FederationError::Validation("display name is required".into()));
    }
    if let Some(github) = new.github.as_deref() {
        if !github.is_empty() && !github.starts_with("https://github.com/") {
            return Err(FederationError::Validation(
                "github must be a https://github.com/ URL".into(),
            ));
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    let author = Author {
        url: format!("{}/authors/{}", fed.public_url, id),
        host: fed.public_url.clone(),
        id,
        display_name: new.display_name.trim().to_string(),
        github: new.github.filter(|g| !g.is_empty()),
        profile_image: new
            .profile_image
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PROFILE_IMAGE.to_string()),
        bio: new.bio,
        is_local: true,
        is_active: true,
    };
    fed.db.insert_author(&author).await?;
    info!(author = %author.id, name = %author.display_name, "Registered author");
    Ok(author)
}

/// Publish a post. `recipient` is required for PRIVATE posts and refused
/// for any other visibility.
pub async fn create_post(
    fed: &Federation,
    new_post: NewPost,
    recipient: Option<&str>,
) -> FederationResult<PublishReport> {
    fed.publish_post(new_post, recipient).await
}

pub async fn follow(
    fed: &Federation,
    follower_id: &str,
    target_id: &str,
) -> FederationResult<(FollowRequest, DeliveryOutcome)> {
    fed.send_follow_request(follower_id, target_id).await
}

/// Accept a pending request addressed to `acting_author_id`.
pub async fn accept_follow_request(
    fed: &Federation,
    acting_author_id: &str,
    request_id: &str,
) -> FederationResult<()> {
    let request = owned_request(fed, acting_author_id, request_id).await?;
    fed.db.confirm_follow_request(&request).await?;
    info!(follower = %request.follower_id, following = %request.following_id, "Follow request accepted");
    Ok(())
}

pub async fn decline_follow_request(
    fed: &Federation,
    acting_author_id: &str,
    request_id: &str,
) -> FederationResult<()> {
    let request = owned_request(fed, acting_author_id, request_id).await?;
    fed.db.delete_follow_request(&request.id).await?;
    info!(follower = %request.follower_id, following = %request.following_id, "Follow request declined");
    Ok(())
}

/// Drop a follow edge. Returns whether one existed.
pub async fn unfollow(fed: &Federation, follower_id: &str, target_id: &str) -> FederationResult<bool> {
    Ok(fed.db.remove_following(follower_id, target_id).await?)
}

/// Like a post. Liking twice returns the first like without redelivering.
pub async fn like_post(
    fed: &Federation,
    author_id: &str,
    post_id: &str,
) -> FederationResult<(PostLike, DeliveryOutcome)> {
    let author = fed.require_author(author_id).await?;
    let post = fed.require_post(post_id).await?;
    ensure_visible(fed, &post, author_id).await?;

    if let Some(existing) = fed.db.find_post_like_by_author(post_id, author_id).await? {
        return Ok((existing, DeliveryOutcome::Skipped));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let like = PostLike {
        external_id: Some(format!("{}/likes/{}", fed.public_url, id)),
        id,
        post_id: post.id.clone(),
        author_id: author.id.clone(),
        summary: format!("{} likes this", author.display_name),
        context: ACTIVITY_STREAMS_CONTEXT.to_string(),
    };
    let like = fed.db.insert_post_like_if_absent(&like).await?;

    let owner = fed.require_author(&post.author_id).await?;
    if owner.id == author.id {
        return Ok((like, DeliveryOutcome::Skipped));
    }
    let fallback = NewNotification {
        author_id: owner.id.clone(),
        message: format!("{} liked your post", author.display_name),
        link: wire::post_url(&owner, &post.id),
    };
    let outcome = fed
        .deliver(Deliverable::PostLike(&like), &owner, Some(fallback))
        .await?;
    Ok((like, outcome))
}

/// Like a comment. Idempotent per (author, comment).
pub async fn like_comment(
    fed: &Federation,
    author_id: &str,
    comment_id: &str,
) -> FederationResult<(CommentLike, DeliveryOutcome)> {
    let author = fed.require_author(author_id).await?;
    let comment = fed
        .db
        .get_comment(comment_id)
        .await?
        .ok_or_else(|| FederationError::not_found(format!("comment {comment_id}")))?;
    let post = fed.require_post(&comment.post_id).await?;
    ensure_visible(fed, &post, author_id).await?;

    if let Some(existing) = fed.db.find_comment_like_by_author(comment_id, author_id).await? {
        return Ok((existing, DeliveryOutcome::Skipped));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let like = CommentLike {
        external_id: Some(format!("{}/likes/{}", fed.public_url, id)),
        id,
        comment_id: comment.id.clone(),
        author_id: author.id.clone(),
        summary: format!("{} likes this", author.display_name),
        context: ACTIVITY_STREAMS_CONTEXT.to_string(),
    };
    let like = fed.db.insert_comment_like_if_absent(&like).await?;

    let owner = fed.require_author(&comment.author_id).await?;
    if owner.id == author.id {
        return Ok((like, DeliveryOutcome::Skipped));
    }
    let post_author = fed.require_author(&post.author_id).await?;
    let fallback = NewNotification {
        author_id: owner.id.clone(),
        message: format!("{} liked your comment", author.display_name),
        link: wire::post_url(&post_author, &post.id),
    };
    let outcome = fed
        .deliver(Deliverable::CommentLike(&like), &owner, Some(fallback))
        .await?;
    Ok((like, outcome))
}

/// Comment on a post the author can see; the post's owner is told.
pub async fn comment_on_post(
    fed: &Federation,
    author_id: &str,
    post_id: &str,
    text: &str,
    content_type: &str,
) -> FederationResult<(Comment, DeliveryOutcome)> {
    if text.trim().is_empty() {
        return Err(FederationError::Validation("comment text is required".into()));
    }
    let author = fed.require_author(author_id).await?;
    let post = fed.require_post(post_id).await?;
    ensure_visible(fed, &post, author_id).await?;

    let comment = Comment {
        id: uuid::Uuid::new_v4().to_string(),
        post_id: post.id.clone(),
        author_id: author.id.clone(),
        comment: text.to_string(),
        content_type: content_type.to_string(),
        published: chrono::Utc::now(),
    };
    let comment = fed.db.insert_comment_if_absent(&comment).await?;

    let owner = fed.require_author(&post.author_id).await?;
    if owner.id == author.id {
        return Ok((comment, DeliveryOutcome::Skipped));
    }
    let fallback = NewNotification {
        author_id: owner.id.clone(),
        message: format!("{} commented on your post", author.display_name),
        link: wire::post_url(&owner, &post.id),
    };
    let outcome = fed
        .deliver(Deliverable::Comment(&comment), &owner, Some(fallback))
        .await?;
    Ok((comment, outcome))
}

async fn owned_request(
    fed: &Federation,
    acting_author_id: &str,
    request_id: &str,
) -> FederationResult<FollowRequest> {
    let request = fed
        .db
        .get_follow_request(request_id)
        .await?
        .ok_or_else(|| FederationError::not_found(format!("follow request {request_id}")))?;
    if request.following_id != acting_author_id {
        return Err(FederationError::Unauthorized);
    }
    Ok(request)
}

async fn ensure_visible(
    fed: &Federation,
    post: &crate::db::models::Post,
    viewer_id: &str,
) -> FederationResult<()> {
    let followers: Vec<String> = fed
        .db
        .get_followers(&post.author_id)
        .await?
        .into_iter()
        .map(|a| a.id)
        .collect();
    if can_view(post, Some(viewer_id), &followers) {
        Ok(())
    } else {
        Err(FederationError::not_found(format!("post {}", post.id)))
    }
}
