// Outbox: durable queue of deliveries to peer inboxes.
//
// Deliveries are written here before the first attempt. A failed attempt
// reschedules the entry with exponential backoff (5s, 10s, 20s, ... capped
// at one hour); after `max_attempts` failures the entry is marked dead and
// stays in the table until an operator requeues it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::client::NodeClient;
use crate::db::models::{Node, OutboxEntry, OutboxState};
use crate::db::Database;

/// How many due entries one drain pass picks up.
pub const DRAIN_BATCH: u32 = 100;

/// Backoff schedule for failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay_ms: i64,
    pub max_delay_ms: i64,
    pub max_attempts: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_delay_ms: 3_600_000,
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: i64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Delay before the next try, given how many attempts already failed
    /// before this one.
    pub fn delay_ms(&self, prior_attempts: i64) -> i64 {
        let exp = prior_attempts.clamp(0, 20) as u32;
        self.base_delay_ms
            .saturating_mul(1_i64 << exp)
            .min(self.max_delay_ms)
    }

    pub fn next_attempt_at(&self, now_ms: i64, prior_attempts: i64) -> i64 {
        now_ms.saturating_add(self.delay_ms(prior_attempts))
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered,
    Retrying { next_attempt_at_ms: i64 },
    Dead,
}

/// Summary of one `process_due` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub delivered: usize,
    pub retried: usize,
    pub dead: usize,
}

pub struct Outbox {
    db: Arc<dyn Database>,
    client: NodeClient,
    policy: RetryPolicy,
}

impl Outbox {
    pub fn new(db: Arc<dyn Database>, client: NodeClient, policy: RetryPolicy) -> Self {
        Self { db, client, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Write a pending delivery for the caller to attempt inline.
    ///
    /// The entry only becomes due for the worker one base delay later, so a
    /// drain pass running concurrently never duplicates the first try.
    pub async fn enqueue(
        &self,
        node: &Node,
        recipient_id: &str,
        kind: &str,
        payload: Value,
    ) -> Result<OutboxEntry> {
        let now = now_ms();
        let entry = OutboxEntry {
            id: uuid::Uuid::new_v4().to_string(),
            node_id: node.id.clone(),
            recipient_id: recipient_id.to_string(),
            kind: kind.to_string(),
            payload,
            attempt_count: 0,
            next_attempt_at_ms: self.policy.next_attempt_at(now, 0),
            last_error: None,
            state: OutboxState::Pending,
            created_at_ms: now,
        };
        self.db.enqueue_outbox(&entry).await?;
        debug!(id = %entry.id, node = %node.host, kind, "Enqueued delivery");
        Ok(entry)
    }

    /// Try one delivery and record the result.
    pub async fn attempt(&self, entry: &OutboxEntry) -> Result<AttemptOutcome> {
        let node = self.db.get_node(&entry.node_id).await?;

        let error = match &node {
            Some(node) => match self
                .client
                .post_inbox(node, &entry.recipient_id, &entry.payload)
                .await
            {
                Ok(()) => {
                    self.db.delete_outbox_entry(&entry.id).await?;
                    debug!(id = %entry.id, node = %node.host, "Delivered");
                    return Ok(AttemptOutcome::Delivered);
                }
                Err(e) => e.to_string(),
            },
            None => format!("node {} is no longer registered", entry.node_id),
        };

        let attempts = entry.attempt_count + 1;
        if node.is_none() || attempts >= self.policy.max_attempts {
            self.db
                .mark_outbox_dead(&entry.id, attempts, &error)
                .await?;
            warn!(id = %entry.id, attempts, error = %error, "Delivery dead-lettered");
            return Ok(AttemptOutcome::Dead);
        }

        let next = self.policy.next_attempt_at(now_ms(), entry.attempt_count);
        self.db
            .mark_outbox_retry(&entry.id, attempts, next, &error)
            .await?;
        debug!(id = %entry.id, attempts, error = %error, "Delivery failed, will retry");
        Ok(AttemptOutcome::Retrying {
            next_attempt_at_ms: next,
        })
    }

    /// Attempt every due pending entry, up to `limit`.
    pub async fn process_due(&self, limit: u32) -> Result<DrainReport> {
        let due = self.db.fetch_due_outbox(now_ms(), limit).await?;
        let mut report = DrainReport::default();

        for entry in &due {
            match self.attempt(entry).await? {
                AttemptOutcome::Delivered => report.delivered += 1,
                AttemptOutcome::Retrying { .. } => report.retried += 1,
                AttemptOutcome::Dead => report.dead += 1,
            }
        }

        if !due.is_empty() {
            info!(
                delivered = report.delivered,
                retried = report.retried,
                dead = report.dead,
                "Outbox pass complete"
            );
        }
        Ok(report)
    }

    /// Drain the queue every `interval` until `shutdown` is notified.
    pub async fn run(&self, interval: Duration, shutdown: Arc<Notify>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    info!("Outbox worker stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.process_due(DRAIN_BATCH).await {
                        warn!(error = %e, "Outbox pass failed");
                    }
                }
            }
        }
    }

    /// Move every dead entry back to pending, due now.
    pub async fn requeue_dead(&self) -> Result<usize> {
        let n = self.db.requeue_dead_outbox(now_ms()).await?;
        if n > 0 {
            info!(count = n, "Requeued dead deliveries");
        }
        Ok(n)
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
