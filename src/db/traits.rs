// Database trait: async interface for all store operations.
//
// The federation code only sees `Arc<dyn Database>`. The sqlite backend
// wraps a synchronous rusqlite Connection in a mutex; the trait keeps that
// detail out of the handlers and the outbox worker.
//
// The trait mirrors the queries.rs function signatures.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{
    Author, Comment, CommentLike, FollowRequest, NewNotification, Node, Notification,
    OutboxEntry, OutboxState, OutboxStats, Post, PostLike, StoreCounts,
};

#[async_trait]
pub trait Database: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    /// Row counts for `grapevine status`.
    async fn store_counts(&self) -> Result<StoreCounts>;

    // --- Authors ---

    /// Insert a new author; fails if the id exists.
    async fn insert_author(&self, author: &Author) -> Result<()>;

    /// Atomic get-or-create keyed on the author id.
    async fn insert_author_if_absent(&self, author: &Author) -> Result<Author>;

    async fn get_author(&self, id: &str) -> Result<Option<Author>>;

    async fn list_local_authors(&self) -> Result<Vec<Author>>;

    // --- Following ---

    async fn add_following(&self, follower_id: &str, following_id: &str) -> Result<bool>;

    async fn remove_following(&self, follower_id: &str, following_id: &str) -> Result<bool>;

    async fn is_following(&self, follower_id: &str, following_id: &str) -> Result<bool>;

    /// Authors following `author_id`.
    async fn get_followers(&self, author_id: &str) -> Result<Vec<Author>>;

    /// Ids `author_id` follows.
    async fn get_following_ids(&self, author_id: &str) -> Result<Vec<String>>;

    // --- Posts & comments ---

    async fn insert_post(&self, post: &Post) -> Result<()>;

    async fn insert_post_if_absent(&self, post: &Post) -> Result<Post>;

    async fn get_post(&self, id: &str) -> Result<Option<Post>>;

    async fn insert_comment_if_absent(&self, comment: &Comment) -> Result<Comment>;

    async fn get_comment(&self, id: &str) -> Result<Option<Comment>>;

    async fn list_comments_for_post(&self, post_id: &str) -> Result<Vec<Comment>>;

    // --- Likes ---

    async fn insert_post_like_if_absent(&self, like: &PostLike) -> Result<PostLike>;

    async fn insert_comment_like_if_absent(&self, like: &CommentLike) -> Result<CommentLike>;

    async fn list_post_likes(&self, post_id: &str) -> Result<Vec<PostLike>>;

    async fn list_comment_likes(&self, comment_id: &str) -> Result<Vec<CommentLike>>;

    async fn find_post_like_by_author(
        &self,
        post_id: &str,
        author_id: &str,
    ) -> Result<Option<PostLike>>;

    async fn find_comment_like_by_author(
        &self,
        comment_id: &str,
        author_id: &str,
    ) -> Result<Option<CommentLike>>;

    // --- Follow requests ---

    /// Returns the stored request and whether this call created it.
    async fn insert_follow_request_if_absent(
        &self,
        request: &FollowRequest,
    ) -> Result<(FollowRequest, bool)>;

    async fn get_follow_request(&self, id: &str) -> Result<Option<FollowRequest>>;

    async fn delete_follow_request(&self, id: &str) -> Result<bool>;

    async fn list_outgoing_follow_requests(&self, follower_id: &str) -> Result<Vec<FollowRequest>>;

    async fn list_incoming_follow_requests(&self, following_id: &str)
        -> Result<Vec<FollowRequest>>;

    /// Delete the request and add the follow edge atomically.
    async fn confirm_follow_request(&self, request: &FollowRequest) -> Result<()>;

    // --- Nodes ---

    async fn insert_node(&self, node: &Node) -> Result<()>;

    async fn get_node(&self, id: &str) -> Result<Option<Node>>;

    async fn get_node_by_host(&self, host: &str) -> Result<Option<Node>>;

    async fn get_node_by_inbound_username(&self, username: &str) -> Result<Option<Node>>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;

    async fn delete_node(&self, id_or_host: &str) -> Result<bool>;

    // --- Notifications & inbox ---

    async fn insert_notification(&self, new: &NewNotification) -> Result<Notification>;

    async fn list_notifications(&self, author_id: &str) -> Result<Vec<Notification>>;

    async fn add_inbox_item(&self, author_id: &str, post_id: &str) -> Result<bool>;

    async fn list_inbox(&self, author_id: &str) -> Result<Vec<Post>>;

    // --- Outbox ---

    async fn enqueue_outbox(&self, entry: &OutboxEntry) -> Result<()>;

    async fn get_outbox_entry(&self, id: &str) -> Result<Option<OutboxEntry>>;

    async fn fetch_due_outbox(&self, now_ms: i64, limit: u32) -> Result<Vec<OutboxEntry>>;

    async fn list_outbox(&self, state: OutboxState, limit: u32) -> Result<Vec<OutboxEntry>>;

    async fn delete_outbox_entry(&self, id: &str) -> Result<bool>;

    async fn mark_outbox_retry(
        &self,
        id: &str,
        attempt_count: i64,
        next_attempt_at_ms: i64,
        error: &str,
    ) -> Result<()>;

    async fn mark_outbox_dead(&self, id: &str, attempt_count: i64, error: &str) -> Result<()>;

    async fn requeue_dead_outbox(&self, now_ms: i64) -> Result<usize>;

    async fn outbox_stats(&self) -> Result<OutboxStats>;
}
