// Inbox dispatcher: route a local event to its recipient.
//
// Recipients on a registered node get the serialized object through the
// outbox (one inline attempt, retried later on failure). Everyone else is
// local: posts land in their inbox, likes and comments become notifications.
//
// Failed deliveries never roll back the post, like or comment that caused
// them. Follow requests are the exception: they are POSTed directly and a
// refused request is deleted locally.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::outbox::AttemptOutcome;
use super::wire;
use super::Federation;
use crate::db::models::{
    Author, Comment, CommentLike, FollowRequest, NewNotification, NewPost, Post, PostLike,
    Visibility,
};
use crate::error::{FederationError, FederationResult};

/// An object that can be delivered to an inbox. The variant picks the
/// serializer.
#[derive(Debug, Clone, Copy)]
pub enum Deliverable<'a> {
    Post(&'a Post),
    Comment(&'a Comment),
    PostLike(&'a PostLike),
    CommentLike(&'a CommentLike),
}

impl Deliverable<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Deliverable::Post(_) => "post",
            Deliverable::Comment(_) => "comment",
            Deliverable::PostLike(_) | Deliverable::CommentLike(_) => "like",
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Accepted by the remote inbox on the first attempt.
    Sent,
    /// Left in the outbox for the worker to retry.
    Queued,
    /// Stored for a local recipient (post inbox or pending follow request).
    LocalInbox,
    /// Replaced by a notification for a local recipient.
    Notified,
    /// Nothing to do: duplicate, self-targeted, or no route.
    Skipped,
    /// The remote node refused; local state was rolled back.
    Failed,
}

/// Result of publishing a post.
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub post: Post,
    pub deliveries: Vec<(String, DeliveryOutcome)>,
}

impl Federation {
    /// Deliver `object` to `recipient`.
    pub async fn deliver(
        &self,
        object: Deliverable<'_>,
        recipient: &Author,
        fallback: Option<NewNotification>,
    ) -> FederationResult<DeliveryOutcome> {
        if let Some(node) = self.node_for(recipient).await? {
            let payload = self.payload_for(object).await?;
            let entry = self
                .outbox
                .enqueue(&node, &recipient.id, object.kind(), payload)
                .await?;
            let outcome = match self.outbox.attempt(&entry).await? {
                AttemptOutcome::Delivered => DeliveryOutcome::Sent,
                AttemptOutcome::Retrying { .. } | AttemptOutcome::Dead => DeliveryOutcome::Queued,
            };
            debug!(kind = object.kind(), recipient = %recipient.id, node = %node.host, ?outcome, "Remote delivery");
            return Ok(outcome);
        }

        if let Some(notification) = fallback {
            self.db.insert_notification(&notification).await?;
            return Ok(DeliveryOutcome::Notified);
        }

        match object {
            Deliverable::Post(post) => {
                self.db.add_inbox_item(&recipient.id, &post.id).await?;
                Ok(DeliveryOutcome::LocalInbox)
            }
            _ => Ok(DeliveryOutcome::Skipped),
        }
    }

    /// Serialize `object` for the wire, loading the authors its ids hang off.
    pub async fn payload_for(&self, object: Deliverable<'_>) -> FederationResult<Value> {
        match object {
            Deliverable::Post(post) => {
                let author = self.require_author(&post.author_id).await?;
                Ok(wire::post_to_wire(post, &author))
            }
            Deliverable::Comment(comment) => {
                let author = self.require_author(&comment.author_id).await?;
                let post = self.require_post(&comment.post_id).await?;
                let post_author = self.require_author(&post.author_id).await?;
                Ok(wire::comment_to_wire(comment, &author, &post_author))
            }
            Deliverable::PostLike(like) => {
                let author = self.require_author(&like.author_id).await?;
                let post = self.require_post(&like.post_id).await?;
                let post_author = self.require_author(&post.author_id).await?;
                Ok(wire::post_like_to_wire(like, &author, &post_author))
            }
            Deliverable::CommentLike(like) => {
                let author = self.require_author(&like.author_id).await?;
                let comment = self
                    .db
                    .get_comment(&like.comment_id)
                    .await?
                    .ok_or_else(|| FederationError::not_found(format!("comment {}", like.comment_id)))?;
                let post = self.require_post(&comment.post_id).await?;
                let post_author = self.require_author(&post.author_id).await?;
                Ok(wire::comment_like_to_wire(
                    like,
                    &author,
                    &comment,
                    &post_author,
                ))
            }
        }
    }

    /// Store a new local post and deliver it.
    ///
    /// Pending outgoing follow requests are reconciled first so freshly
    /// accepted follows already receive this post. PRIVATE posts go only to
    /// `explicit_recipient`; everything else goes to every follower.
    pub async fn publish_post(
        &self,
        new_post: NewPost,
        explicit_recipient: Option<&str>,
    ) -> FederationResult<PublishReport> {
        let recipient = match (new_post.visibility, explicit_recipient) {
            (Visibility::Private, Some(id)) => Some(self.require_author(id).await?),
            (Visibility::Private, None) => {
                return Err(FederationError::Validation(
                    "PRIVATE posts need exactly one recipient".into(),
                ))
            }
            (_, Some(_)) => {
                return Err(FederationError::Validation(
                    "only PRIVATE posts take a recipient".into(),
                ))
            }
            (_, None) => None,
        };

        let author = self.require_author(&new_post.author_id).await?;
        if !author.is_local {
            return Err(FederationError::Validation(format!(
                "author {} is not hosted on this node",
                author.id
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let url = wire::post_url(&author, &id);
        let post = Post {
            id,
            author_id: author.id.clone(),
            title: new_post.title,
            description: new_post.description,
            content: new_post.content,
            content_type: new_post.content_type,
            categories: new_post.categories,
            visibility: new_post.visibility,
            unlisted: new_post.unlisted,
            private_recipient_id: recipient.as_ref().map(|r| r.id.clone()),
            source: url.clone(),
            origin: url,
            published: chrono::Utc::now(),
            count: 0,
        };
        self.db.insert_post(&post).await?;
        info!(post = %post.id, author = %author.id, visibility = %post.visibility, "Published post");

        match self.reconcile_follows(&author.id).await {
            Ok(report) if report.confirmed > 0 => {
                debug!(confirmed = report.confirmed, "Follow requests confirmed before delivery")
            }
            Ok(_) => {}
            Err(e) => warn!(author = %author.id, error = %e, "Follow reconciliation failed"),
        }

        let recipients = match recipient {
            Some(r) => vec![r],
            None => self.db.get_followers(&author.id).await?,
        };

        let mut deliveries = Vec::with_capacity(recipients.len());
        for r in &recipients {
            let outcome = match self.deliver(Deliverable::Post(&post), r, None).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(post = %post.id, recipient = %r.id, error = %e, "Delivery failed");
                    DeliveryOutcome::Failed
                }
            };
            deliveries.push((r.id.clone(), outcome));
        }

        Ok(PublishReport { post, deliveries })
    }

    /// Ask `target_id` to accept `follower_id` as a follower.
    ///
    /// A duplicate request returns the existing one untouched. Remote
    /// targets get the `Follow` payload immediately; if their node refuses
    /// or can't be reached the request is deleted and the outcome is
    /// `Failed`.
    pub async fn send_follow_request(
        &self,
        follower_id: &str,
        target_id: &str,
    ) -> FederationResult<(FollowRequest, DeliveryOutcome)> {
        if follower_id == target_id {
            return Err(FederationError::Validation(
                "authors cannot follow themselves".into(),
            ));
        }
        let follower = self.require_author(follower_id).await?;
        if !follower.is_local {
            return Err(FederationError::Validation(format!(
                "author {follower_id} is not hosted on this node"
            )));
        }
        let target = self.require_author(target_id).await?;
        if self.db.is_following(follower_id, target_id).await? {
            return Err(FederationError::Validation(format!(
                "{follower_id} already follows {target_id}"
            )));
        }

        let candidate = FollowRequest {
            id: uuid::Uuid::new_v4().to_string(),
            summary: format!(
                "{} wants to follow {}",
                follower.display_name, target.display_name
            ),
            follower_id: follower.id.clone(),
            following_id: target.id.clone(),
        };
        let (request, created) = self.db.insert_follow_request_if_absent(&candidate).await?;
        if !created {
            return Ok((request, DeliveryOutcome::Skipped));
        }

        let Some(node) = self.node_for(&target).await? else {
            let outcome = if target.is_local {
                DeliveryOutcome::LocalInbox
            } else {
                DeliveryOutcome::Skipped
            };
            return Ok((request, outcome));
        };

        let payload = wire::follow_to_wire(&request, &follower, &target);
        match self.client.post_inbox(&node, &target.id, &payload).await {
            Ok(()) => {
                info!(follower = %follower.id, target = %target.id, node = %node.host, "Follow request sent");
                Ok((request, DeliveryOutcome::Sent))
            }
            Err(e) => {
                warn!(follower = %follower.id, target = %target.id, error = %e, "Follow request refused, discarding");
                self.db.delete_follow_request(&request.id).await?;
                Ok((request, DeliveryOutcome::Failed))
            }
        }
    }

    pub(crate) async fn require_author(&self, id: &str) -> FederationResult<Author> {
        self.db
            .get_author(id)
            .await?
            .ok_or_else(|| FederationError::not_found(format!("author {id}")))
    }

    pub(crate) async fn require_post(&self, id: &str) -> FederationResult<Post> {
        self.db
            .get_post(id)
            .await?
            .ok_or_else(|| FederationError::not_found(format!("post {id}")))
    }
}
