// Follow reconciler: promote outgoing follow requests the remote side has
// accepted.
//
// For each pending request to a remote author we ask the target's node
// whether we are listed as a follower. Confirmed requests become follow
// edges; everything else stays pending for the next run.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::Federation;
use crate::error::{FederationError, FederationResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub confirmed: usize,
    pub pending: usize,
    pub unreachable: usize,
}

/// Does a followers-check response confirm the follow?
///
/// `{"isFollower": true}` does. Peers that answer with the follower record
/// itself (a non-empty object without `isFollower`) count as confirming too.
pub fn confirms_follower(body: &Value) -> bool {
    match body.get("isFollower") {
        Some(flag) => flag.as_bool().unwrap_or(false),
        None => body.as_object().is_some_and(|o| !o.is_empty()),
    }
}

impl Federation {
    /// Check every outgoing follow request of `author_id` against the
    /// target's node.
    pub async fn reconcile_follows(&self, author_id: &str) -> FederationResult<ReconcileReport> {
        let requests = self.db.list_outgoing_follow_requests(author_id).await?;
        let mut report = ReconcileReport::default();

        for request in requests {
            let Some(target) = self.db.get_author(&request.following_id).await? else {
                report.pending += 1;
                continue;
            };
            let Some(node) = self.node_for(&target).await? else {
                // Local targets accept through the local flow
                report.pending += 1;
                continue;
            };

            let path = format!("authors/{}/followers/{}", target.id, author_id);
            match self.client.get_json(&node, &path).await {
                Ok(body) if confirms_follower(&body) => {
                    self.db.confirm_follow_request(&request).await?;
                    report.confirmed += 1;
                    debug!(follower = author_id, target = %target.id, "Follow confirmed");
                }
                Ok(_) | Err(FederationError::NotFound(_)) => {
                    report.pending += 1;
                }
                Err(e) => {
                    warn!(node = %node.host, target = %target.id, error = %e, "Followers check failed");
                    report.unreachable += 1;
                }
            }
        }

        if report.confirmed > 0 || report.unreachable > 0 {
            info!(
                author = author_id,
                confirmed = report.confirmed,
                pending = report.pending,
                unreachable = report.unreachable,
                "Reconciled follow requests"
            );
        }
        Ok(report)
    }
}
