// Federation core: everything that crosses a node boundary.
//
// `Federation` bundles the store, the node client, the outbox and the
// resolver. Dispatch, reconciliation and backfill are implemented as
// methods on it in their own modules.

pub mod backfill;
pub mod client;
pub mod dispatcher;
pub mod ids;
pub mod outbox;
pub mod reconciler;
pub mod resolver;
pub mod wire;

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::db::models::{Author, Node};
use crate::db::Database;
use client::NodeClient;
use outbox::{Outbox, RetryPolicy};
use resolver::Resolver;

pub use dispatcher::{Deliverable, DeliveryOutcome};

#[derive(Clone)]
pub struct Federation {
    pub db: Arc<dyn Database>,
    pub client: NodeClient,
    pub outbox: Arc<Outbox>,
    pub resolver: Resolver,
    /// Base URL local author URLs are built from, without trailing slash.
    pub public_url: String,
}

impl Federation {
    pub fn new(db: Arc<dyn Database>, config: &Config) -> Result<Self> {
        let client = NodeClient::new(config.http_timeout)?;
        let policy = RetryPolicy::with_max_attempts(config.outbox_max_attempts);
        Ok(Self {
            outbox: Arc::new(Outbox::new(Arc::clone(&db), client.clone(), policy)),
            resolver: Resolver::new(Arc::clone(&db)),
            client,
            public_url: config.public_url.trim_end_matches('/').to_string(),
            db,
        })
    }

    /// The registered node serving `author`, if the author is remote.
    pub async fn node_for(&self, author: &Author) -> Result<Option<Node>> {
        if author.is_local {
            return Ok(None);
        }
        let host = ids::normalize_host(&author.host);
        if host.is_empty() {
            return Ok(None);
        }
        self.db.get_node_by_host(&host).await
    }
}
