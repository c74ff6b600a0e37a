// Author handlers for peer nodes.
//
// GET /api/authors: local authors
// GET /api/authors/{author_id}: one local author
// GET /api/authors/{author_id}/followers: who follows them
// GET /api/authors/{author_id}/followers/{fid}: follower check
//
// The follower check is what remote reconcilers poll to learn that a follow
// request they sent has been accepted here.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::db::models::Author;
use crate::federation::wire;
use crate::web::{api_error, AppState};

/// GET /api/authors
pub async fn list_authors(State(state): State<AppState>) -> Response {
    match state.db.list_local_authors().await {
        Ok(authors) => Json(listing("authors", &authors)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "DB error listing authors");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
    }
}

/// GET /api/authors/{author_id}: shadow copies of remote authors are not served.
pub async fn get_author(State(state): State<AppState>, Path(author_id): Path<String>) -> Response {
    match state.db.get_author(&author_id).await {
        Ok(Some(author)) if author.is_local => Json(wire::author_to_wire(&author)).into_response(),
        Ok(_) => api_error(StatusCode::NOT_FOUND, "Author not found"),
        Err(e) => {
            tracing::error!(error = %e, author = %author_id, "DB error fetching author");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
    }
}

/// GET /api/authors/{author_id}/followers
pub async fn list_followers(
    State(state): State<AppState>,
    Path(author_id): Path<String>,
) -> Response {
    match state.db.get_author(&author_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "Author not found"),
        Err(e) => {
            tracing::error!(error = %e, author = %author_id, "DB error fetching author");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    }

    match state.db.get_followers(&author_id).await {
        Ok(followers) => Json(listing("followers", &followers)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, author = %author_id, "DB error listing followers");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
    }
}

/// GET /api/authors/{author_id}/followers/{follower_id}
pub async fn check_follower(
    State(state): State<AppState>,
    Path((author_id, follower_id)): Path<(String, String)>,
) -> Response {
    match state.db.is_following(&follower_id, &author_id).await {
        Ok(is_follower) => Json(json!({ "isFollower": is_follower })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, author = %author_id, "DB error checking follower");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
    }
}

fn listing(kind: &str, authors: &[Author]) -> Value {
    let items: Vec<Value> = authors.iter().map(wire::author_to_wire).collect();
    json!({ "type": kind, "items": items })
}
