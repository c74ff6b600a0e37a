// SqliteDatabase: rusqlite backend implementing the Database trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Sync.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across .await points.

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{
    Author, Comment, CommentLike, FollowRequest, NewNotification, Node, Notification,
    OutboxEntry, OutboxState, OutboxStats, Post, PostLike, StoreCounts,
};
use super::queries;
use super::traits::Database;

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Fresh in-memory store with the schema applied. Used by tests and by
    /// tools that need a scratch database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        super::schema::create_tables(&conn)?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn store_counts(&self) -> Result<StoreCounts> {
        let conn = self.conn.lock().await;
        queries::store_counts(&conn)
    }

    async fn insert_author(&self, author: &Author) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::insert_author(&conn, author)
    }

    async fn insert_author_if_absent(&self, author: &Author) -> Result<Author> {
        let conn = self.conn.lock().await;
        queries::insert_author_if_absent(&conn, author)
    }

    async fn get_author(&self, id: &str) -> Result<Option<Author>> {
        let conn = self.conn.lock().await;
        queries::get_author(&conn, id)
    }

    async fn list_local_authors(&self) -> Result<Vec<Author>> {
        let conn = self.conn.lock().await;
        queries::list_local_authors(&conn)
    }

    async fn add_following(&self, follower_id: &str, following_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::add_following(&conn, follower_id, following_id)
    }

    async fn remove_following(&self, follower_id: &str, following_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::remove_following(&conn, follower_id, following_id)
    }

    async fn is_following(&self, follower_id: &str, following_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::is_following(&conn, follower_id, following_id)
    }

    async fn get_followers(&self, author_id: &str) -> Result<Vec<Author>> {
        let conn = self.conn.lock().await;
        queries::get_followers(&conn, author_id)
    }

    async fn get_following_ids(&self, author_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        queries::get_following_ids(&conn, author_id)
    }

    async fn insert_post(&self, post: &Post) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::insert_post(&conn, post)
    }

    async fn insert_post_if_absent(&self, post: &Post) -> Result<Post> {
        let conn = self.conn.lock().await;
        queries::insert_post_if_absent(&conn, post)
    }

    async fn get_post(&self, id: &str) -> Result<Option<Post>> {
        let conn = self.conn.lock().await;
        queries::get_post(&conn, id)
    }

    async fn insert_comment_if_absent(&self, comment: &Comment) -> Result<Comment> {
        let conn = self.conn.lock().await;
        queries::insert_comment_if_absent(&conn, comment)
    }

    async fn get_comment(&self, id: &str) -> Result<Option<Comment>> {
        let conn = self.conn.lock().await;
        queries::get_comment(&conn, id)
    }

    async fn list_comments_for_post(&self, post_id: &str) -> Result<Vec<Comment>> {
        let conn = self.conn.lock().await;
        queries::list_comments_for_post(&conn, post_id)
    }

    async fn insert_post_like_if_absent(&self, like: &PostLike) -> Result<PostLike> {
        let conn = self.conn.lock().await;
        queries::insert_post_like_if_absent(&conn, like)
    }

    async fn insert_comment_like_if_absent(&self, like: &CommentLike) -> Result<CommentLike> {
        let conn = self.conn.lock().await;
        queries::insert_comment_like_if_absent(&conn, like)
    }

    async fn list_post_likes(&self, post_id: &str) -> Result<Vec<PostLike>> {
        let conn = self.conn.lock().await;
        queries::list_post_likes(&conn, post_id)
    }

    async fn list_comment_likes(&self, comment_id: &str) -> Result<Vec<CommentLike>> {
        let conn = self.conn.lock().await;
        queries::list_comment_likes(&conn, comment_id)
    }

    async fn find_post_like_by_author(
        &self,
        post_id: &str,
        author_id: &str,
    ) -> Result<Option<PostLike>> {
        let conn = self.conn.lock().await;
        queries::find_post_like_by_author(&conn, post_id, author_id)
    }

    async fn find_comment_like_by_author(
        &self,
        comment_id: &str,
        author_id: &str,
    ) -> Result<Option<CommentLike>> {
        let conn = self.conn.lock().await;
        queries::find_comment_like_by_author(&conn, comment_id, author_id)
    }

    async fn insert_follow_request_if_absent(
        &self,
        request: &FollowRequest,
    ) -> Result<(FollowRequest, bool)> {
        let conn = self.conn.lock().await;
        queries::insert_follow_request_if_absent(&conn, request)
    }

    async fn get_follow_request(&self, id: &str) -> Result<Option<FollowRequest>> {
        let conn = self.conn.lock().await;
        queries::get_follow_request(&conn, id)
    }

    async fn delete_follow_request(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::delete_follow_request(&conn, id)
    }

    async fn list_outgoing_follow_requests(&self, follower_id: &str) -> Result<Vec<FollowRequest>> {
        let conn = self.conn.lock().await;
        queries::list_outgoing_follow_requests(&conn, follower_id)
    }

    async fn list_incoming_follow_requests(
        &self,
        following_id: &str,
    ) -> Result<Vec<FollowRequest>> {
        let conn = self.conn.lock().await;
        queries::list_incoming_follow_requests(&conn, following_id)
    }

    async fn confirm_follow_request(&self, request: &FollowRequest) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::confirm_follow_request(&conn, request)
    }

    async fn insert_node(&self, node: &Node) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::insert_node(&conn, node)
    }

    async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let conn = self.conn.lock().await;
        queries::get_node(&conn, id)
    }

    async fn get_node_by_host(&self, host: &str) -> Result<Option<Node>> {
        let conn = self.conn.lock().await;
        queries::get_node_by_host(&conn, host)
    }

    async fn get_node_by_inbound_username(&self, username: &str) -> Result<Option<Node>> {
        let conn = self.conn.lock().await;
        queries::get_node_by_inbound_username(&conn, username)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let conn = self.conn.lock().await;
        queries::list_nodes(&conn)
    }

    async fn delete_node(&self, id_or_host: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::delete_node(&conn, id_or_host)
    }

    async fn insert_notification(&self, new: &NewNotification) -> Result<Notification> {
        let conn = self.conn.lock().await;
        queries::insert_notification(&conn, new)
    }

    async fn list_notifications(&self, author_id: &str) -> Result<Vec<Notification>> {
        let conn = self.conn.lock().await;
        queries::list_notifications(&conn, author_id)
    }

    async fn add_inbox_item(&self, author_id: &str, post_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::add_inbox_item(&conn, author_id, post_id)
    }

    async fn list_inbox(&self, author_id: &str) -> Result<Vec<Post>> {
        let conn = self.conn.lock().await;
        queries::list_inbox(&conn, author_id)
    }

    async fn enqueue_outbox(&self, entry: &OutboxEntry) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::enqueue_outbox(&conn, entry)
    }

    async fn get_outbox_entry(&self, id: &str) -> Result<Option<OutboxEntry>> {
        let conn = self.conn.lock().await;
        queries::get_outbox_entry(&conn, id)
    }

    async fn fetch_due_outbox(&self, now_ms: i64, limit: u32) -> Result<Vec<OutboxEntry>> {
        let conn = self.conn.lock().await;
        queries::fetch_due_outbox(&conn, now_ms, limit)
    }

    async fn list_outbox(&self, state: OutboxState, limit: u32) -> Result<Vec<OutboxEntry>> {
        let conn = self.conn.lock().await;
        queries::list_outbox(&conn, state, limit)
    }

    async fn delete_outbox_entry(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::delete_outbox_entry(&conn, id)
    }

    async fn mark_outbox_retry(
        &self,
        id: &str,
        attempt_count: i64,
        next_attempt_at_ms: i64,
        error: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::mark_outbox_retry(&conn, id, attempt_count, next_attempt_at_ms, error)
    }

    async fn mark_outbox_dead(&self, id: &str, attempt_count: i64, error: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::mark_outbox_dead(&conn, id, attempt_count, error)
    }

    async fn requeue_dead_outbox(&self, now_ms: i64) -> Result<usize> {
        let conn = self.conn.lock().await;
        queries::requeue_dead_outbox(&conn, now_ms)
    }

    async fn outbox_stats(&self) -> Result<OutboxStats> {
        let conn = self.conn.lock().await;
        queries::outbox_stats(&conn)
    }
}
