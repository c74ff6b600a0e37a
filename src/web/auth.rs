// Auth middleware: HTTP Basic auth against registered peer nodes.
//
// A peer presents `Authorization: Basic base64(username:password)`. The
// username selects the node row (`nodes.inbound_username`); the password is
// hashed with SHA-256 and compared against `nodes.inbound_secret_hash`.
// Plaintext inbound secrets are never stored.
//
// Auth check (this middleware):
//   parse header → look up node by username → compare hashes → allow

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use super::{AppState, AuthNode};
use crate::db::models::Node;

/// Axum middleware: reject requests without valid node credentials with 401.
pub async fn require_node(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some((username, password)) = basic_credentials(request.headers()) else {
        return unauthorized();
    };

    let node = match state.db.get_node_by_inbound_username(&username).await {
        Ok(Some(node)) => node,
        Ok(None) => {
            tracing::debug!(username = %username, "Unknown node username");
            return unauthorized();
        }
        Err(e) => {
            tracing::error!(error = %e, "DB error looking up node credentials");
            return super::api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    if !verify_secret(&node, &password) {
        tracing::warn!(node = %node.host, "Rejected node credentials");
        return unauthorized();
    }

    request.extensions_mut().insert(AuthNode(node));
    next.run(request).await
}

/// SHA-256 hex digest of an inbound secret, as stored in the nodes table.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Does `password` match the node's stored inbound secret?
pub fn verify_secret(node: &Node, password: &str) -> bool {
    constant_time_eq(&hash_secret(password), &node.inbound_secret_hash)
}

/// Extract `(username, password)` from a Basic `Authorization` header.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

// --- Private helpers ---

fn unauthorized() -> Response {
    let mut response = super::api_error(StatusCode::UNAUTHORIZED, "Node credentials required");
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        header::HeaderValue::from_static("Basic realm=\"grapevine\""),
    );
    response.into_response()
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_basic_credentials_roundtrip() {
        let encoded = STANDARD.encode("peer-a:s3cret:with-colon");
        let creds = basic_credentials(&headers_with(&format!("Basic {encoded}"))).unwrap();
        assert_eq!(creds.0, "peer-a");
        // Only the first colon separates username from password
        assert_eq!(creds.1, "s3cret:with-colon");
    }

    #[test]
    fn test_non_basic_scheme_rejected() {
        assert!(basic_credentials(&headers_with("Bearer abc")).is_none());
        assert!(basic_credentials(&headers_with("Basic !!not-base64!!")).is_none());
        assert!(basic_credentials(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_verify_secret() {
        let node = Node {
            id: "n1".into(),
            node_name: "us".into(),
            node_cred: "out".into(),
            api_url: "http://peer.example/api".into(),
            host: "peer.example".into(),
            inbound_username: "peer".into(),
            inbound_secret_hash: hash_secret("letmein"),
        };
        assert!(verify_secret(&node, "letmein"));
        assert!(!verify_secret(&node, "letmeout"));
        assert!(!verify_secret(&node, ""));
    }

    #[test]
    fn test_hash_secret_is_hex_sha256() {
        let digest = hash_secret("abc");
        assert_eq!(digest.len(), 64);
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
