// Inbox receiver: POST /api/authors/{author_id}/inbox
//
// Peers deliver four kinds of object here, distinguished by `type`:
//   post    → added to the recipient's inbox if they still follow the sender
//   Follow  → stored as a pending follow request
//   Like    → stored (deduplicated) and the recipient notified
//   comment → stored on the local post and the recipient notified
//
// The body is read raw and parsed here so that invalid JSON, non-object
// bodies and unknown types all come back as 400 with a JSON error.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::db::models::{Author, FollowRequest, NewNotification, Node, Visibility};
use crate::error::{FederationError, FederationResult};
use crate::federation::wire::{self, LikeTarget, WireComment, WireFollow, WireLike, WirePost};
use crate::web::{AppState, AuthNode};

/// POST /api/authors/{author_id}/inbox
pub async fn receive(
    State(state): State<AppState>,
    Extension(AuthNode(node)): Extension<AuthNode>,
    Path(author_id): Path<String>,
    body: Bytes,
) -> Response {
    match handle(&state, &node, &author_id, &body).await {
        Ok((status, body)) => (status, Json(body)).into_response(),
        Err(e) => {
            debug!(node = %node.host, recipient = %author_id, error = %e, "Inbox delivery rejected");
            e.into_response()
        }
    }
}

async fn handle(
    state: &AppState,
    node: &Node,
    author_id: &str,
    body: &[u8],
) -> FederationResult<(StatusCode, Value)> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| FederationError::malformed(format!("body is not JSON: {e}")))?;
    if !payload.is_object() {
        return Err(FederationError::malformed("inbox body must be a JSON object"));
    }
    let kind = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();

    let recipient = state.federation.require_author(author_id).await?;

    match kind.as_str() {
        "post" => receive_post(state, &recipient, parse(payload)?).await,
        "follow" => receive_follow(state, node, &recipient, parse(payload)?).await,
        "like" => receive_like(state, &recipient, parse(payload)?).await,
        "comment" => receive_comment(state, &recipient, parse(payload)?).await,
        "" => Err(FederationError::Validation("payload has no type".into())),
        other => Err(FederationError::Validation(format!(
            "unsupported object type {other:?}"
        ))),
    }
}

fn parse<T: DeserializeOwned>(payload: Value) -> FederationResult<T> {
    serde_json::from_value(payload).map_err(FederationError::malformed)
}

/// Accept a post into the recipient's inbox.
///
/// The post must already be cached locally. It is taken when the recipient
/// follows the sender, or when it is a PRIVATE post addressed to the
/// recipient. Anything else means the recipient has unfollowed the sender:
/// the delivery is acknowledged and dropped.
async fn receive_post(
    state: &AppState,
    recipient: &Author,
    payload: WirePost,
) -> FederationResult<(StatusCode, Value)> {
    let fed = &state.federation;
    let sender_wire = payload
        .author
        .as_ref()
        .ok_or_else(|| FederationError::malformed("post payload has no author"))?;
    let sender = fed.resolver.resolve_author(sender_wire).await?;

    let post_id = payload
        .identity()
        .ok_or_else(|| FederationError::malformed("post payload has no usable id"))?;
    let post = fed.require_post(&post_id).await?;

    let followed = state.db.get_following_ids(&recipient.id).await?;
    let addressed_here = post.visibility == Visibility::Private
        && post.private_recipient_id.as_deref() == Some(recipient.id.as_str());
    if followed.contains(&sender.id) || addressed_here {
        state.db.add_inbox_item(&recipient.id, &post.id).await?;
        info!(post = %post.id, recipient = %recipient.id, sender = %sender.id, "Post delivered to inbox");
        Ok((StatusCode::OK, json!({ "status": "delivered" })))
    } else {
        debug!(post = %post.id, recipient = %recipient.id, "Discarding post from unfollowed sender");
        Ok((StatusCode::ACCEPTED, json!({ "status": "discarded" })))
    }
}

/// Store a follow request for the inbox owner, who must be its `object`.
async fn receive_follow(
    state: &AppState,
    node: &Node,
    recipient: &Author,
    payload: WireFollow,
) -> FederationResult<(StatusCode, Value)> {
    let fed = &state.federation;
    let actor_wire = payload
        .actor
        .as_ref()
        .ok_or_else(|| FederationError::malformed("Follow payload has no actor"))?;
    let actor = fed.resolver.resolve_author(actor_wire).await?;

    let target_id = payload
        .object
        .as_ref()
        .and_then(|o| o.identity())
        .ok_or_else(|| FederationError::malformed("Follow payload has no object"))?;
    if target_id != recipient.id {
        return Err(FederationError::Validation(format!(
            "Follow for {target_id} delivered to the inbox of {}",
            recipient.id
        )));
    }
    let target = state
        .db
        .get_author(&target_id)
        .await?
        .filter(|a| a.is_local)
        .ok_or_else(|| FederationError::not_found(format!("author {target_id}")))?;

    let candidate = FollowRequest {
        id: uuid::Uuid::new_v4().to_string(),
        summary: payload
            .summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| {
                format!("{} wants to follow {}", actor.display_name, target.display_name)
            }),
        follower_id: actor.id.clone(),
        following_id: target.id.clone(),
    };
    let (request, created) = state.db.insert_follow_request_if_absent(&candidate).await?;
    if created {
        info!(follower = %actor.id, target = %target.id, node = %node.host, "Follow request received");
    }

    Ok((
        StatusCode::CREATED,
        wire::follow_to_wire(&request, &actor, &target),
    ))
}

async fn receive_like(
    state: &AppState,
    recipient: &Author,
    payload: WireLike,
) -> FederationResult<(StatusCode, Value)> {
    let fed = &state.federation;
    let target = payload
        .target()
        .ok_or_else(|| FederationError::malformed("Like payload names no post or comment"))?;

    let (body, message, link) = match target {
        LikeTarget::Post(post_id) => {
            let post = fed.require_post(&post_id).await?;
            let like = fed.resolver.resolve_post_like(&payload, &post).await?;
            let liker = fed.require_author(&like.author_id).await?;
            let post_author = fed.require_author(&post.author_id).await?;
            (
                wire::post_like_to_wire(&like, &liker, &post_author),
                format!("{} liked your post", liker.display_name),
                wire::post_url(&post_author, &post.id),
            )
        }
        LikeTarget::Comment(comment_id) => {
            let comment = state
                .db
                .get_comment(&comment_id)
                .await?
                .ok_or_else(|| FederationError::not_found(format!("comment {comment_id}")))?;
            let post = fed.require_post(&comment.post_id).await?;
            let like = fed.resolver.resolve_comment_like(&payload, &comment).await?;
            let liker = fed.require_author(&like.author_id).await?;
            let post_author = fed.require_author(&post.author_id).await?;
            (
                wire::comment_like_to_wire(&like, &liker, &comment, &post_author),
                format!("{} liked your comment", liker.display_name),
                wire::post_url(&post_author, &post.id),
            )
        }
    };

    state
        .db
        .insert_notification(&NewNotification {
            author_id: recipient.id.clone(),
            message,
            link,
        })
        .await?;
    Ok((StatusCode::CREATED, body))
}

async fn receive_comment(
    state: &AppState,
    recipient: &Author,
    payload: WireComment,
) -> FederationResult<(StatusCode, Value)> {
    let fed = &state.federation;
    let author_wire = payload
        .author
        .as_ref()
        .ok_or_else(|| FederationError::malformed("comment payload has no author"))?;
    let author = fed.resolver.resolve_author(author_wire).await?;

    let post_id = payload
        .target_post_id()
        .ok_or_else(|| FederationError::malformed("comment payload names no post"))?;
    let post = fed.require_post(&post_id).await?;

    let comment = fed
        .resolver
        .resolve_comment(&payload, &post)
        .await?
        .ok_or_else(|| FederationError::malformed("comment payload could not be resolved"))?;

    state
        .db
        .insert_notification(&NewNotification {
            author_id: recipient.id.clone(),
            message: format!("{} commented on your post", author.display_name),
            link: format!("{}/posts/{}", recipient.url.trim_end_matches('/'), post.id),
        })
        .await?;

    let post_author = fed.require_author(&post.author_id).await?;
    Ok((
        StatusCode::CREATED,
        wire::comment_to_wire(&comment, &author, &post_author),
    ))
}
