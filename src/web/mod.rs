// Web server: the peer-facing HTTP surface of this node.
//
// Every /api/* route is node-authenticated: the caller presents the basic
// auth pair registered for it with `grapevine node add`. /health is open.
// The outbox worker runs alongside the server and stops on Ctrl-C.

use std::sync::Arc;

use anyhow::Result;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::Notify;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::db::models::Node;
use crate::db::Database;
use crate::error::FederationError;
use crate::federation::Federation;

pub mod auth;
pub mod handlers;

/// Shared application state threaded through all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub config: Arc<Config>,
    pub federation: Arc<Federation>,
}

impl AppState {
    pub fn new(config: Config, db: Arc<dyn Database>) -> Result<Self> {
        let federation = Federation::new(Arc::clone(&db), &config)?;
        Ok(Self {
            db,
            config: Arc::new(config),
            federation: Arc::new(federation),
        })
    }
}

/// Start the server and the outbox worker; block until Ctrl-C.
pub async fn run_server(
    config: Config,
    db: Arc<dyn Database>,
    port: u16,
    bind: &str,
) -> Result<()> {
    let state = AppState::new(config, db)?;

    let shutdown = Arc::new(Notify::new());
    let outbox = Arc::clone(&state.federation.outbox);
    let interval = state.config.outbox_interval;
    let worker_shutdown = Arc::clone(&shutdown);
    let worker = tokio::spawn(async move { outbox.run(interval, worker_shutdown).await });

    let app = build_router(state);

    let addr = format!("{bind}:{port}");
    info!("Grapevine node listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutting down");
        })
        .await?;

    // notify_one stores a permit if the worker is mid-drain
    shutdown.notify_one();
    if let Err(e) = worker.await {
        error!(error = %e, "Outbox worker panicked");
    }
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    // Peer routes (require registered node credentials)
    let node_api = Router::new()
        .route("/api/authors", get(handlers::authors::list_authors))
        .route("/api/authors/{author_id}", get(handlers::authors::get_author))
        .route(
            "/api/authors/{author_id}/inbox",
            post(handlers::inbox::receive),
        )
        .route(
            "/api/authors/{author_id}/followers",
            get(handlers::authors::list_followers),
        )
        .route(
            "/api/authors/{author_id}/followers/{follower_id}",
            get(handlers::authors::check_follower),
        )
        .route(
            "/api/authors/{author_id}/posts/{post_id}",
            get(handlers::posts::get_post),
        )
        .route(
            "/api/authors/{author_id}/posts/{post_id}/comments",
            get(handlers::posts::list_comments),
        )
        .route(
            "/api/authors/{author_id}/posts/{post_id}/likes",
            get(handlers::posts::list_likes),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_node,
        ));

    let public = Router::new().route("/health", get(health));

    Router::new()
        .merge(node_api)
        .merge(public)
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check: always returns 200 OK.
async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "status": "ok" })),
    )
}

/// Typed JSON error response helper.
pub fn api_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}

impl IntoResponse for FederationError {
    fn into_response(self) -> Response {
        let status = match &self {
            FederationError::NotFound(_) => StatusCode::NOT_FOUND,
            FederationError::Validation(_) | FederationError::MalformedRemoteData(_) => {
                StatusCode::BAD_REQUEST
            }
            FederationError::Unauthorized => StatusCode::UNAUTHORIZED,
            FederationError::RemoteUnavailable(_) => StatusCode::BAD_GATEWAY,
            FederationError::Storage(e) => {
                error!(error = %format!("{e:#}"), "Storage error while serving request");
                return api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error");
            }
        };
        api_error(status, &self.to_string())
    }
}

/// The peer node that authenticated the request.
/// Inserted into request extensions by `require_node` middleware.
#[derive(Clone)]
pub struct AuthNode(pub Node);
