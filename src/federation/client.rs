// Node client: authenticated HTTP calls to registered peer nodes.
//
// A thin reqwest wrapper: every request carries the node's outbound
// basic-auth pair and is bounded by the configured timeout. Paths are
// joined onto the node's api_url, so `authors/{id}/inbox` becomes
// `{api_url}/authors/{id}/inbox`.

use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use tracing::debug;

use crate::db::models::Node;
use crate::error::{FederationError, FederationResult};

/// Outbound calls give up after this long unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct NodeClient {
    http: reqwest::Client,
}

impl NodeClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("grapevine/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http })
    }

    /// POST a payload to a recipient's inbox on `node`.
    pub async fn post_inbox(
        &self,
        node: &Node,
        recipient_id: &str,
        payload: &Value,
    ) -> FederationResult<()> {
        let url = inbox_url(node, recipient_id);
        debug!(url = %url, node = %node.host, "POST inbox");

        let response = self
            .http
            .post(&url)
            .basic_auth(&node.node_name, Some(&node.node_cred))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FederationError::RemoteUnavailable(format!(
                "{url} returned {status}: {}",
                truncate(&body, 200)
            )));
        }
        Ok(())
    }

    /// GET a JSON document from `node`. A 404 maps to `NotFound`, other
    /// failures to `RemoteUnavailable`, an unparseable body to
    /// `MalformedRemoteData`.
    pub async fn get_json(&self, node: &Node, path: &str) -> FederationResult<Value> {
        let url = node_url(node, path);
        debug!(url = %url, node = %node.host, "GET");

        let response = self
            .http
            .get(&url)
            .basic_auth(&node.node_name, Some(&node.node_cred))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FederationError::NotFound(url));
        }
        if !status.is_success() {
            return Err(FederationError::RemoteUnavailable(format!(
                "{url} returned {status}"
            )));
        }

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| FederationError::malformed(format!("{url} returned invalid JSON: {e}")))
    }
}

/// `{api_url}/{path}` with exactly one slash between them.
pub fn node_url(node: &Node, path: &str) -> String {
    format!(
        "{}/{}",
        node.api_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub fn inbox_url(node: &Node, recipient_id: &str) -> String {
    node_url(node, &format!("authors/{recipient_id}/inbox"))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
