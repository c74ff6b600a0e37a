// Post handlers for peer nodes.
//
// GET /api/authors/{author_id}/posts/{post_id}: the post
// GET /api/authors/{author_id}/posts/{post_id}/comments: its comments
// GET /api/authors/{author_id}/posts/{post_id}/likes: its likes
//
// A peer node is an anonymous viewer: only PUBLIC posts are served, anything
// else is indistinguishable from a missing post.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::db::models::{Author, Post};
use crate::error::{FederationError, FederationResult};
use crate::federation::wire;
use crate::visibility::can_view;
use crate::web::AppState;

/// GET /api/authors/{author_id}/posts/{post_id}
pub async fn get_post(
    State(state): State<AppState>,
    Path((author_id, post_id)): Path<(String, String)>,
) -> Response {
    match visible_post(&state, &author_id, &post_id).await {
        Ok((post, author)) => Json(wire::post_to_wire(&post, &author)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/authors/{author_id}/posts/{post_id}/comments
pub async fn list_comments(
    State(state): State<AppState>,
    Path((author_id, post_id)): Path<(String, String)>,
) -> Response {
    let result = async {
        let (post, post_author) = visible_post(&state, &author_id, &post_id).await?;
        let comments = state.db.list_comments_for_post(&post.id).await?;
        let mut items = Vec::with_capacity(comments.len());
        for comment in &comments {
            let author = state.federation.require_author(&comment.author_id).await?;
            items.push(wire::comment_to_wire(comment, &author, &post_author));
        }
        Ok::<Value, FederationError>(json!({ "type": "comments", "comments": items }))
    }
    .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/authors/{author_id}/posts/{post_id}/likes
pub async fn list_likes(
    State(state): State<AppState>,
    Path((author_id, post_id)): Path<(String, String)>,
) -> Response {
    let result = async {
        let (post, post_author) = visible_post(&state, &author_id, &post_id).await?;
        let likes = state.db.list_post_likes(&post.id).await?;
        let mut items = Vec::with_capacity(likes.len());
        for like in &likes {
            let author = state.federation.require_author(&like.author_id).await?;
            items.push(wire::post_like_to_wire(like, &author, &post_author));
        }
        Ok::<Value, FederationError>(json!({ "type": "likes", "items": items }))
    }
    .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Load a post by author and id, 404 unless an anonymous viewer may see it.
async fn visible_post(
    state: &AppState,
    author_id: &str,
    post_id: &str,
) -> FederationResult<(Post, Author)> {
    let post = state
        .db
        .get_post(post_id)
        .await?
        .filter(|p| p.author_id == author_id && can_view(p, None, &[]))
        .ok_or_else(|| FederationError::not_found(format!("post {post_id}")))?;
    let author = state.federation.require_author(author_id).await?;
    Ok((post, author))
}
