// Backfill: pull authors, posts and interactions from peer nodes.
//
// Listings are parsed entry by entry: one bad author or comment is logged
// and skipped, the rest of the page still lands. Node-level failures in
// `sync_all_authors` are likewise logged and skipped.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::wire::{self, WireAuthor, WireComment, WireLike, WirePost};
use super::Federation;
use crate::db::models::{Author, Node, Post};
use crate::error::{FederationError, FederationResult};

/// Nodes synced concurrently by `sync_all_authors`.
const SYNC_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub resolved: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub nodes_synced: usize,
    pub nodes_failed: Vec<String>,
    pub authors_resolved: usize,
    pub entries_skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InteractionReport {
    pub comments: usize,
    pub likes: usize,
    pub skipped: usize,
}

impl Federation {
    /// Cache every author listed by `node`.
    pub async fn sync_authors(&self, node: &Node) -> FederationResult<SyncReport> {
        let body = self.client.get_json(node, "authors").await?;
        let entries = listing(body, "authors")?;
        let mut report = SyncReport::default();

        for entry in entries {
            let parsed: Result<WireAuthor, _> = serde_json::from_value(entry);
            let outcome = match parsed {
                Ok(payload) => self.resolver.resolve_author(&payload).await,
                Err(e) => Err(FederationError::malformed(e)),
            };
            match outcome {
                Ok(_) => report.resolved += 1,
                Err(FederationError::Storage(e)) => return Err(FederationError::Storage(e)),
                Err(e) => {
                    warn!(node = %node.host, error = %e, "Skipping listed author");
                    report.skipped += 1;
                }
            }
        }

        info!(node = %node.host, resolved = report.resolved, skipped = report.skipped, "Synced authors");
        Ok(report)
    }

    /// `sync_authors` for every registered node.
    pub async fn sync_all_authors(&self) -> FederationResult<BackfillReport> {
        let nodes = self.db.list_nodes().await?;

        let results: Vec<(String, FederationResult<SyncReport>)> = stream::iter(nodes)
            .map(|node| async move {
                let result = self.sync_authors(&node).await;
                (node.host, result)
            })
            .buffer_unordered(SYNC_CONCURRENCY)
            .collect()
            .await;

        let mut report = BackfillReport::default();
        for (host, result) in results {
            match result {
                Ok(sync) => {
                    report.nodes_synced += 1;
                    report.authors_resolved += sync.resolved;
                    report.entries_skipped += sync.skipped;
                }
                Err(e) => {
                    warn!(node = %host, error = %e, "Author sync failed");
                    report.nodes_failed.push(host);
                }
            }
        }
        report.nodes_failed.sort();
        Ok(report)
    }

    /// Fetch one post of a remote author and cache it.
    pub async fn fetch_remote_post(&self, author: &Author, post_id: &str) -> FederationResult<Post> {
        let node = self.node_for(author).await?.ok_or_else(|| {
            FederationError::not_found(format!("no node registered for {}", author.host))
        })?;

        let body = self
            .client
            .get_json(&node, &format!("authors/{}/posts/{}", author.id, post_id))
            .await?;
        let payload: WirePost =
            serde_json::from_value(body).map_err(FederationError::malformed)?;
        self.resolver.resolve_post(&payload, author).await
    }

    /// Cache the comments and likes a remote post has on its home node.
    pub async fn sync_post_interactions(&self, post: &Post) -> FederationResult<InteractionReport> {
        let author = self.require_author(&post.author_id).await?;
        let node = self.node_for(&author).await?.ok_or_else(|| {
            FederationError::not_found(format!("no node registered for {}", author.host))
        })?;
        let base = format!("authors/{}/posts/{}", author.id, post.id);
        let mut report = InteractionReport::default();

        let comments = listing(
            self.client.get_json(&node, &format!("{base}/comments")).await?,
            "comments",
        )?;
        for entry in comments {
            let Ok(payload) = serde_json::from_value::<WireComment>(entry) else {
                report.skipped += 1;
                continue;
            };
            match self.resolver.resolve_comment(&payload, post).await? {
                Some(_) => report.comments += 1,
                None => report.skipped += 1,
            }
        }

        let likes = listing(
            self.client.get_json(&node, &format!("{base}/likes")).await?,
            "likes",
        )?;
        for entry in likes {
            let outcome = match serde_json::from_value::<WireLike>(entry) {
                Ok(payload) => self.resolver.resolve_post_like(&payload, post).await,
                Err(e) => Err(FederationError::malformed(e)),
            };
            match outcome {
                Ok(_) => report.likes += 1,
                Err(FederationError::Storage(e)) => return Err(FederationError::Storage(e)),
                Err(e) => {
                    warn!(post = %post.id, error = %e, "Skipping remote like");
                    report.skipped += 1;
                }
            }
        }

        info!(
            post = %post.id,
            comments = report.comments,
            likes = report.likes,
            skipped = report.skipped,
            "Synced post interactions"
        );
        Ok(report)
    }
}

fn listing(body: Value, what: &str) -> FederationResult<Vec<Value>> {
    wire::listing_items(body)
        .ok_or_else(|| FederationError::malformed(format!("unrecognized {what} listing envelope")))
}
