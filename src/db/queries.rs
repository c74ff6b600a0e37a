// Database queries: CRUD operations for all tables.
//
// Every database interaction goes through this module. This keeps SQL
// contained in one place and gives the rest of the app clean Rust interfaces.
//
// Get-or-create operations are a single `INSERT ... ON CONFLICT DO NOTHING`
// followed by a read of the surviving row, so two concurrent writers of the
// same identity converge on one record.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{
    Author, Comment, CommentLike, FollowRequest, NewNotification, Node, Notification,
    OutboxEntry, OutboxState, OutboxStats, Post, PostLike, StoreCounts,
};

// --- Row mapping helpers ---

/// Parse a TEXT column through `FromStr`, surfacing failures as a column
/// conversion error rather than silently defaulting.
fn parse_text<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = anyhow::Error>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

const AUTHOR_COLUMNS: &str =
    "id, url, host, display_name, github, profile_image, bio, is_local, is_active";

fn author_from_row(row: &Row<'_>) -> rusqlite::Result<Author> {
    Ok(Author {
        id: row.get(0)?,
        url: row.get(1)?,
        host: row.get(2)?,
        display_name: row.get(3)?,
        github: row.get(4)?,
        profile_image: row.get(5)?,
        bio: row.get(6)?,
        is_local: row.get(7)?,
        is_active: row.get(8)?,
    })
}

const POST_COLUMNS: &str = "id, author_id, title, description, content, content_type, categories,
     visibility, unlisted, private_recipient_id, source, origin, published, count";

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        author_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        content: row.get(4)?,
        content_type: row.get(5)?,
        categories: parse_json(row, 6)?,
        visibility: parse_text(row, 7)?,
        unlisted: row.get(8)?,
        private_recipient_id: row.get(9)?,
        source: row.get(10)?,
        origin: row.get(11)?,
        published: parse_timestamp(row, 12)?,
        count: row.get(13)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        comment: row.get(3)?,
        content_type: row.get(4)?,
        published: parse_timestamp(row, 5)?,
    })
}

fn post_like_from_row(row: &Row<'_>) -> rusqlite::Result<PostLike> {
    Ok(PostLike {
        id: row.get(0)?,
        external_id: row.get(1)?,
        post_id: row.get(2)?,
        author_id: row.get(3)?,
        summary: row.get(4)?,
        context: row.get(5)?,
    })
}

fn comment_like_from_row(row: &Row<'_>) -> rusqlite::Result<CommentLike> {
    Ok(CommentLike {
        id: row.get(0)?,
        external_id: row.get(1)?,
        comment_id: row.get(2)?,
        author_id: row.get(3)?,
        summary: row.get(4)?,
        context: row.get(5)?,
    })
}

fn follow_request_from_row(row: &Row<'_>) -> rusqlite::Result<FollowRequest> {
    Ok(FollowRequest {
        id: row.get(0)?,
        summary: row.get(1)?,
        follower_id: row.get(2)?,
        following_id: row.get(3)?,
    })
}

const NODE_COLUMNS: &str =
    "id, node_name, node_cred, api_url, host, inbound_username, inbound_secret_hash";

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        id: row.get(0)?,
        node_name: row.get(1)?,
        node_cred: row.get(2)?,
        api_url: row.get(3)?,
        host: row.get(4)?,
        inbound_username: row.get(5)?,
        inbound_secret_hash: row.get(6)?,
    })
}

const OUTBOX_COLUMNS: &str = "id, node_id, recipient_id, kind, payload, attempt_count,
     next_attempt_at_ms, last_error, state, created_at_ms";

fn outbox_from_row(row: &Row<'_>) -> rusqlite::Result<OutboxEntry> {
    Ok(OutboxEntry {
        id: row.get(0)?,
        node_id: row.get(1)?,
        recipient_id: row.get(2)?,
        kind: row.get(3)?,
        payload: parse_json(row, 4)?,
        attempt_count: row.get(5)?,
        next_attempt_at_ms: row.get(6)?,
        last_error: row.get(7)?,
        state: parse_text::<OutboxState>(row, 8)?,
        created_at_ms: row.get(9)?,
    })
}

// --- Authors ---

/// Insert a new author. Fails if the id is already taken.
pub fn insert_author(conn: &Connection, author: &Author) -> Result<()> {
    conn.execute(
        "INSERT INTO authors (id, url, host, display_name, github, profile_image, bio, is_local, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            author.id,
            author.url,
            author.host,
            author.display_name,
            author.github,
            author.profile_image,
            author.bio,
            author.is_local,
            author.is_active,
        ],
    )
    .with_context(|| format!("Failed to insert author {}", author.id))?;
    Ok(())
}

/// Insert the author unless one with the same id exists, then return the
/// stored row (which may be the pre-existing one).
pub fn insert_author_if_absent(conn: &Connection, author: &Author) -> Result<Author> {
    conn.execute(
        "INSERT INTO authors (id, url, host, display_name, github, profile_image, bio, is_local, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO NOTHING",
        params![
            author.id,
            author.url,
            author.host,
            author.display_name,
            author.github,
            author.profile_image,
            author.bio,
            author.is_local,
            author.is_active,
        ],
    )?;
    get_author(conn, &author.id)?
        .with_context(|| format!("Author {} vanished after insert", author.id))
}

pub fn get_author(conn: &Connection, id: &str) -> Result<Option<Author>> {
    let sql = format!("SELECT {AUTHOR_COLUMNS} FROM authors WHERE id = ?1");
    let author = conn
        .query_row(&sql, params![id], author_from_row)
        .optional()?;
    Ok(author)
}

/// All authors hosted on this node, oldest first.
pub fn list_local_authors(conn: &Connection) -> Result<Vec<Author>> {
    let sql = format!(
        "SELECT {AUTHOR_COLUMNS} FROM authors WHERE is_local = 1 ORDER BY created_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], author_from_row)?;
    collect(rows)
}

/// Delete an author. Posts, comments, likes and requests cascade.
pub fn delete_author(conn: &Connection, id: &str) -> Result<bool> {
    let n = conn.execute("DELETE FROM authors WHERE id = ?1", params![id])?;
    Ok(n > 0)
}

// --- Following edges ---

/// Add a follow edge. Returns false if it already existed.
pub fn add_following(conn: &Connection, follower_id: &str, following_id: &str) -> Result<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO following (follower_id, following_id) VALUES (?1, ?2)",
        params![follower_id, following_id],
    )?;
    Ok(n > 0)
}

pub fn remove_following(conn: &Connection, follower_id: &str, following_id: &str) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM following WHERE follower_id = ?1 AND following_id = ?2",
        params![follower_id, following_id],
    )?;
    Ok(n > 0)
}

pub fn is_following(conn: &Connection, follower_id: &str, following_id: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM following WHERE follower_id = ?1 AND following_id = ?2)",
        params![follower_id, following_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Authors who follow `author_id`.
pub fn get_followers(conn: &Connection, author_id: &str) -> Result<Vec<Author>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.url, a.host, a.display_name, a.github, a.profile_image, a.bio,
                a.is_local, a.is_active
         FROM following f
         JOIN authors a ON a.id = f.follower_id
         WHERE f.following_id = ?1
         ORDER BY f.created_at, a.id",
    )?;
    let rows = stmt.query_map(params![author_id], author_from_row)?;
    collect(rows)
}

/// Ids of the authors `author_id` follows.
pub fn get_following_ids(conn: &Connection, author_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT following_id FROM following WHERE follower_id = ?1 ORDER BY created_at, following_id",
    )?;
    let rows = stmt.query_map(params![author_id], |row| row.get(0))?;
    collect(rows)
}

// --- Posts ---

pub fn insert_post(conn: &Connection, post: &Post) -> Result<()> {
    insert_post_inner(conn, post, false)
        .with_context(|| format!("Failed to insert post {}", post.id))?;
    Ok(())
}

pub fn insert_post_if_absent(conn: &Connection, post: &Post) -> Result<Post> {
    insert_post_inner(conn, post, true)?;
    get_post(conn, &post.id)?.with_context(|| format!("Post {} vanished after insert", post.id))
}

fn insert_post_inner(conn: &Connection, post: &Post, ignore_conflict: bool) -> Result<()> {
    let categories = serde_json::to_string(&post.categories)?;
    let conflict = if ignore_conflict {
        " ON CONFLICT(id) DO NOTHING"
    } else {
        ""
    };
    let sql = format!(
        "INSERT INTO posts ({POST_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14){conflict}"
    );
    conn.execute(
        &sql,
        params![
            post.id,
            post.author_id,
            post.title,
            post.description,
            post.content,
            post.content_type,
            categories,
            post.visibility.as_str(),
            post.unlisted,
            post.private_recipient_id,
            post.source,
            post.origin,
            post.published.to_rfc3339(),
            post.count,
        ],
    )?;
    Ok(())
}

pub fn get_post(conn: &Connection, id: &str) -> Result<Option<Post>> {
    let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1");
    let post = conn.query_row(&sql, params![id], post_from_row).optional()?;
    Ok(post)
}

pub fn delete_post(conn: &Connection, id: &str) -> Result<bool> {
    let n = conn.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
    Ok(n > 0)
}

// --- Comments ---

pub fn insert_comment_if_absent(conn: &Connection, comment: &Comment) -> Result<Comment> {
    conn.execute(
        "INSERT INTO comments (id, post_id, author_id, comment, content_type, published)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO NOTHING",
        params![
            comment.id,
            comment.post_id,
            comment.author_id,
            comment.comment,
            comment.content_type,
            comment.published.to_rfc3339(),
        ],
    )?;
    get_comment(conn, &comment.id)?
        .with_context(|| format!("Comment {} vanished after insert", comment.id))
}

pub fn get_comment(conn: &Connection, id: &str) -> Result<Option<Comment>> {
    let comment = conn
        .query_row(
            "SELECT id, post_id, author_id, comment, content_type, published
             FROM comments WHERE id = ?1",
            params![id],
            comment_from_row,
        )
        .optional()?;
    Ok(comment)
}

pub fn list_comments_for_post(conn: &Connection, post_id: &str) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT id, post_id, author_id, comment, content_type, published
         FROM comments WHERE post_id = ?1
         ORDER BY published, rowid",
    )?;
    let rows = stmt.query_map(params![post_id], comment_from_row)?;
    collect(rows)
}

// --- Likes ---

/// A like's external id is already recorded against a different object.
#[derive(Debug, thiserror::Error)]
#[error("like {external_id} is recorded on {stored_on}, not {requested_on}")]
pub struct LikeConflict {
    pub external_id: String,
    pub stored_on: String,
    pub requested_on: String,
}

/// Store a post like unless an equivalent one exists.
///
/// Equivalence is the external id when present, otherwise the summary text
/// on the same post. Returns whichever row survives.
pub fn insert_post_like_if_absent(conn: &Connection, like: &PostLike) -> Result<PostLike> {
    conn.execute(
        "INSERT INTO post_likes (id, external_id, post_id, author_id, summary, context)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT DO NOTHING",
        params![
            like.id,
            like.external_id,
            like.post_id,
            like.author_id,
            like.summary,
            like.context,
        ],
    )?;

    let stored = match &like.external_id {
        Some(ext) => conn
            .query_row(
                "SELECT id, external_id, post_id, author_id, summary, context
                 FROM post_likes WHERE external_id = ?1",
                params![ext],
                post_like_from_row,
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT id, external_id, post_id, author_id, summary, context
                 FROM post_likes
                 WHERE post_id = ?1 AND summary = ?2 AND external_id IS NULL",
                params![like.post_id, like.summary],
                post_like_from_row,
            )
            .optional()?,
    };
    let stored =
        stored.with_context(|| format!("Like on post {} vanished after insert", like.post_id))?;
    if stored.post_id != like.post_id {
        return Err(LikeConflict {
            external_id: stored.external_id.unwrap_or_default(),
            stored_on: stored.post_id,
            requested_on: like.post_id.clone(),
        }
        .into());
    }
    Ok(stored)
}

pub fn insert_comment_like_if_absent(conn: &Connection, like: &CommentLike) -> Result<CommentLike> {
    conn.execute(
        "INSERT INTO comment_likes (id, external_id, comment_id, author_id, summary, context)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT DO NOTHING",
        params![
            like.id,
            like.external_id,
            like.comment_id,
            like.author_id,
            like.summary,
            like.context,
        ],
    )?;

    let stored = match &like.external_id {
        Some(ext) => conn
            .query_row(
                "SELECT id, external_id, comment_id, author_id, summary, context
                 FROM comment_likes WHERE external_id = ?1",
                params![ext],
                comment_like_from_row,
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT id, external_id, comment_id, author_id, summary, context
                 FROM comment_likes
                 WHERE comment_id = ?1 AND summary = ?2 AND external_id IS NULL",
                params![like.comment_id, like.summary],
                comment_like_from_row,
            )
            .optional()?,
    };
    let stored = stored
        .with_context(|| format!("Like on comment {} vanished after insert", like.comment_id))?;
    if stored.comment_id != like.comment_id {
        return Err(LikeConflict {
            external_id: stored.external_id.unwrap_or_default(),
            stored_on: stored.comment_id,
            requested_on: like.comment_id.clone(),
        }
        .into());
    }
    Ok(stored)
}

pub fn list_post_likes(conn: &Connection, post_id: &str) -> Result<Vec<PostLike>> {
    let mut stmt = conn.prepare(
        "SELECT id, external_id, post_id, author_id, summary, context
         FROM post_likes WHERE post_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![post_id], post_like_from_row)?;
    collect(rows)
}

pub fn list_comment_likes(conn: &Connection, comment_id: &str) -> Result<Vec<CommentLike>> {
    let mut stmt = conn.prepare(
        "SELECT id, external_id, comment_id, author_id, summary, context
         FROM comment_likes WHERE comment_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![comment_id], comment_like_from_row)?;
    collect(rows)
}

/// The like `author_id` left on a post, if any.
pub fn find_post_like_by_author(
    conn: &Connection,
    post_id: &str,
    author_id: &str,
) -> Result<Option<PostLike>> {
    let like = conn
        .query_row(
            "SELECT id, external_id, post_id, author_id, summary, context
             FROM post_likes WHERE post_id = ?1 AND author_id = ?2
             ORDER BY rowid LIMIT 1",
            params![post_id, author_id],
            post_like_from_row,
        )
        .optional()?;
    Ok(like)
}

pub fn find_comment_like_by_author(
    conn: &Connection,
    comment_id: &str,
    author_id: &str,
) -> Result<Option<CommentLike>> {
    let like = conn
        .query_row(
            "SELECT id, external_id, comment_id, author_id, summary, context
             FROM comment_likes WHERE comment_id = ?1 AND author_id = ?2
             ORDER BY rowid LIMIT 1",
            params![comment_id, author_id],
            comment_like_from_row,
        )
        .optional()?;
    Ok(like)
}

// --- Follow requests ---

/// Store a follow request unless one already exists for the pair.
/// Returns the stored request and whether it was newly created.
pub fn insert_follow_request_if_absent(
    conn: &Connection,
    request: &FollowRequest,
) -> Result<(FollowRequest, bool)> {
    let n = conn.execute(
        "INSERT INTO follow_requests (id, summary, follower_id, following_id)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(follower_id, following_id) DO NOTHING",
        params![
            request.id,
            request.summary,
            request.follower_id,
            request.following_id,
        ],
    )?;
    let stored = find_follow_request(conn, &request.follower_id, &request.following_id)?
        .context("Follow request vanished after insert")?;
    Ok((stored, n > 0))
}

pub fn get_follow_request(conn: &Connection, id: &str) -> Result<Option<FollowRequest>> {
    let request = conn
        .query_row(
            "SELECT id, summary, follower_id, following_id FROM follow_requests WHERE id = ?1",
            params![id],
            follow_request_from_row,
        )
        .optional()?;
    Ok(request)
}

pub fn find_follow_request(
    conn: &Connection,
    follower_id: &str,
    following_id: &str,
) -> Result<Option<FollowRequest>> {
    let request = conn
        .query_row(
            "SELECT id, summary, follower_id, following_id FROM follow_requests
             WHERE follower_id = ?1 AND following_id = ?2",
            params![follower_id, following_id],
            follow_request_from_row,
        )
        .optional()?;
    Ok(request)
}

pub fn delete_follow_request(conn: &Connection, id: &str) -> Result<bool> {
    let n = conn.execute("DELETE FROM follow_requests WHERE id = ?1", params![id])?;
    Ok(n > 0)
}

/// Requests sent by `follower_id` that are still pending.
pub fn list_outgoing_follow_requests(
    conn: &Connection,
    follower_id: &str,
) -> Result<Vec<FollowRequest>> {
    let mut stmt = conn.prepare(
        "SELECT id, summary, follower_id, following_id FROM follow_requests
         WHERE follower_id = ?1 ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map(params![follower_id], follow_request_from_row)?;
    collect(rows)
}

/// Requests waiting on `following_id` to accept or decline.
pub fn list_incoming_follow_requests(
    conn: &Connection,
    following_id: &str,
) -> Result<Vec<FollowRequest>> {
    let mut stmt = conn.prepare(
        "SELECT id, summary, follower_id, following_id FROM follow_requests
         WHERE following_id = ?1 ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map(params![following_id], follow_request_from_row)?;
    collect(rows)
}

/// Turn a pending request into a follow edge in one transaction.
pub fn confirm_follow_request(conn: &Connection, request: &FollowRequest) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM follow_requests WHERE id = ?1",
        params![request.id],
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO following (follower_id, following_id) VALUES (?1, ?2)",
        params![request.follower_id, request.following_id],
    )?;
    tx.commit()?;
    Ok(())
}

// --- Nodes ---

pub fn insert_node(conn: &Connection, node: &Node) -> Result<()> {
    conn.execute(
        "INSERT INTO nodes (id, node_name, node_cred, api_url, host, inbound_username, inbound_secret_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            node.id,
            node.node_name,
            node.node_cred,
            node.api_url,
            node.host,
            node.inbound_username,
            node.inbound_secret_hash,
        ],
    )
    .with_context(|| format!("Failed to register node for host {}", node.host))?;
    Ok(())
}

pub fn get_node(conn: &Connection, id: &str) -> Result<Option<Node>> {
    let sql = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1");
    let node = conn.query_row(&sql, params![id], node_from_row).optional()?;
    Ok(node)
}

/// Look up the node serving a normalized host.
pub fn get_node_by_host(conn: &Connection, host: &str) -> Result<Option<Node>> {
    let sql = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE host = ?1");
    let node = conn.query_row(&sql, params![host], node_from_row).optional()?;
    Ok(node)
}

pub fn get_node_by_inbound_username(conn: &Connection, username: &str) -> Result<Option<Node>> {
    let sql = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE inbound_username = ?1");
    let node = conn
        .query_row(&sql, params![username], node_from_row)
        .optional()?;
    Ok(node)
}

pub fn list_nodes(conn: &Connection) -> Result<Vec<Node>> {
    let sql = format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY host");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], node_from_row)?;
    collect(rows)
}

/// Remove a node by id or host.
pub fn delete_node(conn: &Connection, id_or_host: &str) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM nodes WHERE id = ?1 OR host = ?1",
        params![id_or_host],
    )?;
    Ok(n > 0)
}

// --- Notifications ---

pub fn insert_notification(conn: &Connection, new: &NewNotification) -> Result<Notification> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO notifications (id, author_id, message, link) VALUES (?1, ?2, ?3, ?4)",
        params![id, new.author_id, new.message, new.link],
    )
    .with_context(|| format!("Failed to notify author {}", new.author_id))?;
    let notification = conn.query_row(
        "SELECT id, author_id, message, link, created_at FROM notifications WHERE id = ?1",
        params![id],
        |row| {
            Ok(Notification {
                id: row.get(0)?,
                author_id: row.get(1)?,
                message: row.get(2)?,
                link: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )?;
    Ok(notification)
}

/// Notifications for an author, newest first.
pub fn list_notifications(conn: &Connection, author_id: &str) -> Result<Vec<Notification>> {
    let mut stmt = conn.prepare(
        "SELECT id, author_id, message, link, created_at FROM notifications
         WHERE author_id = ?1 ORDER BY created_at DESC, rowid DESC",
    )?;
    let rows = stmt.query_map(params![author_id], |row| {
        Ok(Notification {
            id: row.get(0)?,
            author_id: row.get(1)?,
            message: row.get(2)?,
            link: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;
    collect(rows)
}

// --- Inbox ---

/// Append a post to an author's inbox. Returns false if it was already there.
pub fn add_inbox_item(conn: &Connection, author_id: &str, post_id: &str) -> Result<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO inbox_items (author_id, post_id) VALUES (?1, ?2)",
        params![author_id, post_id],
    )?;
    Ok(n > 0)
}

/// Posts in an author's inbox, most recently delivered first.
pub fn list_inbox(conn: &Connection, author_id: &str) -> Result<Vec<Post>> {
    let sql = format!(
        "SELECT {} FROM inbox_items i JOIN posts p ON p.id = i.post_id
         WHERE i.author_id = ?1
         ORDER BY i.added_at DESC, i.rowid DESC",
        POST_COLUMNS
            .split(',')
            .map(|c| format!("p.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![author_id], post_from_row)?;
    collect(rows)
}

// --- Outbox ---

pub fn enqueue_outbox(conn: &Connection, entry: &OutboxEntry) -> Result<()> {
    let payload = serde_json::to_string(&entry.payload)?;
    conn.execute(
        &format!(
            "INSERT INTO outbox ({OUTBOX_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            entry.id,
            entry.node_id,
            entry.recipient_id,
            entry.kind,
            payload,
            entry.attempt_count,
            entry.next_attempt_at_ms,
            entry.last_error,
            entry.state.as_str(),
            entry.created_at_ms,
        ],
    )
    .context("Failed to enqueue outbox entry")?;
    Ok(())
}

pub fn get_outbox_entry(conn: &Connection, id: &str) -> Result<Option<OutboxEntry>> {
    let sql = format!("SELECT {OUTBOX_COLUMNS} FROM outbox WHERE id = ?1");
    let entry = conn
        .query_row(&sql, params![id], outbox_from_row)
        .optional()?;
    Ok(entry)
}

/// Pending entries whose next attempt is due, oldest schedule first.
pub fn fetch_due_outbox(conn: &Connection, now_ms: i64, limit: u32) -> Result<Vec<OutboxEntry>> {
    let sql = format!(
        "SELECT {OUTBOX_COLUMNS} FROM outbox
         WHERE state = 'pending' AND next_attempt_at_ms <= ?1
         ORDER BY next_attempt_at_ms, created_at_ms
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![now_ms, limit], outbox_from_row)?;
    collect(rows)
}

/// Entries in a given state, newest first.
pub fn list_outbox(conn: &Connection, state: OutboxState, limit: u32) -> Result<Vec<OutboxEntry>> {
    let sql = format!(
        "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE state = ?1
         ORDER BY created_at_ms DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![state.as_str(), limit], outbox_from_row)?;
    collect(rows)
}

/// Delivered: drop the entry.
pub fn delete_outbox_entry(conn: &Connection, id: &str) -> Result<bool> {
    let n = conn.execute("DELETE FROM outbox WHERE id = ?1", params![id])?;
    Ok(n > 0)
}

pub fn mark_outbox_retry(
    conn: &Connection,
    id: &str,
    attempt_count: i64,
    next_attempt_at_ms: i64,
    error: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE outbox SET attempt_count = ?2, next_attempt_at_ms = ?3, last_error = ?4
         WHERE id = ?1",
        params![id, attempt_count, next_attempt_at_ms, error],
    )?;
    Ok(())
}

pub fn mark_outbox_dead(conn: &Connection, id: &str, attempt_count: i64, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE outbox SET attempt_count = ?2, last_error = ?3, state = 'dead' WHERE id = ?1",
        params![id, attempt_count, error],
    )?;
    Ok(())
}

/// Put every dead entry back in the queue with a fresh attempt budget.
pub fn requeue_dead_outbox(conn: &Connection, now_ms: i64) -> Result<usize> {
    let n = conn.execute(
        "UPDATE outbox SET state = 'pending', attempt_count = 0, next_attempt_at_ms = ?1
         WHERE state = 'dead'",
        params![now_ms],
    )?;
    Ok(n)
}

pub fn outbox_stats(conn: &Connection) -> Result<OutboxStats> {
    let stats = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN state = 'pending' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN state = 'dead' THEN 1 ELSE 0 END), 0)
         FROM outbox",
        [],
        |row| {
            Ok(OutboxStats {
                pending: row.get(0)?,
                dead: row.get(1)?,
            })
        },
    )?;
    Ok(stats)
}

// --- Status ---

pub fn store_counts(conn: &Connection) -> Result<StoreCounts> {
    let counts = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM authors WHERE is_local = 1),
            (SELECT COUNT(*) FROM authors WHERE is_local = 0),
            (SELECT COUNT(*) FROM posts),
            (SELECT COUNT(*) FROM comments),
            (SELECT COUNT(*) FROM post_likes) + (SELECT COUNT(*) FROM comment_likes),
            (SELECT COUNT(*) FROM follow_requests),
            (SELECT COUNT(*) FROM nodes)",
        [],
        |row| {
            Ok(StoreCounts {
                local_authors: row.get(0)?,
                shadow_authors: row.get(1)?,
                posts: row.get(2)?,
                comments: row.get(3)?,
                likes: row.get(4)?,
                follow_requests: row.get(5)?,
                nodes: row.get(6)?,
            })
        },
    )?;
    Ok(counts)
}
