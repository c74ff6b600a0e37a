// Database schema: table creation and migrations.
//
// We use a simple version-based migration approach: a `schema_version` table
// tracks which migrations have run, and each migration is a function that
// executes SQL statements.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// This is idempotent: safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Tracks schema version for future migrations
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Local authors and shadow copies of remote authors.
        -- The id is the global identity; the PRIMARY KEY makes shadow
        -- creation an atomic insert-or-fetch.
        CREATE TABLE IF NOT EXISTS authors (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL DEFAULT '',
            host TEXT NOT NULL DEFAULT '',
            display_name TEXT NOT NULL DEFAULT '',
            github TEXT,
            profile_image TEXT NOT NULL,
            bio TEXT NOT NULL DEFAULT '',
            is_local INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Asymmetric follow edges: follower_id follows following_id
        CREATE TABLE IF NOT EXISTS following (
            follower_id TEXT NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
            following_id TEXT NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (follower_id, following_id)
        );

        CREATE TABLE IF NOT EXISTS posts (
            id TEXT PRIMARY KEY,
            author_id TEXT NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
            title TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            content_type TEXT NOT NULL DEFAULT 'text/plain',
            categories TEXT NOT NULL DEFAULT '[]',   -- JSON array of strings
            visibility TEXT NOT NULL DEFAULT 'PUBLIC',
            unlisted INTEGER NOT NULL DEFAULT 0,
            private_recipient_id TEXT REFERENCES authors(id) ON DELETE CASCADE,
            source TEXT NOT NULL DEFAULT '',
            origin TEXT NOT NULL DEFAULT '',
            published TEXT NOT NULL,                 -- RFC 3339, UTC
            count INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS comments (
            id TEXT PRIMARY KEY,
            post_id TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            author_id TEXT NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
            comment TEXT NOT NULL DEFAULT '',
            content_type TEXT NOT NULL DEFAULT 'text/plain',
            published TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS post_likes (
            id TEXT PRIMARY KEY,
            post_id TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            author_id TEXT NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
            summary TEXT NOT NULL,
            context TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS comment_likes (
            id TEXT PRIMARY KEY,
            comment_id TEXT NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
            author_id TEXT NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
            summary TEXT NOT NULL,
            context TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS follow_requests (
            id TEXT PRIMARY KEY,
            summary TEXT NOT NULL DEFAULT '',
            follower_id TEXT NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
            following_id TEXT NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (follower_id, following_id)
        );

        -- Registered peer nodes. Outbound credentials are the pair we present
        -- to the peer; the inbound secret is stored as a SHA-256 hex digest.
        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            node_name TEXT NOT NULL,
            node_cred TEXT NOT NULL,
            api_url TEXT NOT NULL,
            host TEXT NOT NULL UNIQUE,
            inbound_username TEXT NOT NULL UNIQUE,
            inbound_secret_hash TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            author_id TEXT NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
            message TEXT NOT NULL,
            link TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        -- Per-author inbox (stream) of delivered posts
        CREATE TABLE IF NOT EXISTS inbox_items (
            author_id TEXT NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
            post_id TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            added_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (author_id, post_id)
        );

        -- Durable queue of remote deliveries
        CREATE TABLE IF NOT EXISTS outbox (
            id TEXT PRIMARY KEY,
            node_id TEXT NOT NULL,             -- not a FK: entries outlive removed nodes and go dead
            recipient_id TEXT NOT NULL,
            kind TEXT NOT NULL,                -- post / comment / like / follow
            payload TEXT NOT NULL,             -- JSON body POSTed to the peer inbox
            attempt_count INTEGER NOT NULL DEFAULT 0,
            next_attempt_at_ms INTEGER NOT NULL,
            last_error TEXT,
            state TEXT NOT NULL DEFAULT 'pending',
            created_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_following_target
            ON following(following_id);

        CREATE INDEX IF NOT EXISTS idx_posts_author
            ON posts(author_id);

        CREATE INDEX IF NOT EXISTS idx_comments_post
            ON comments(post_id);

        CREATE INDEX IF NOT EXISTS idx_notifications_author
            ON notifications(author_id, created_at);

        -- The outbox worker scans for due pending entries
        CREATE INDEX IF NOT EXISTS idx_outbox_due
            ON outbox(state, next_attempt_at_ms);
        ",
    )
    .context("Failed to create database tables")?;

    // Record initial schema version if not already set
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    // Migration v2: stable like identities.
    // Likes that carry a cross-node id are keyed on it; likes without one
    // fall back to summary text, unique per liked object.
    run_migration(conn, 2, |c| {
        c.execute_batch(
            "ALTER TABLE post_likes ADD COLUMN external_id TEXT;
             ALTER TABLE comment_likes ADD COLUMN external_id TEXT;
             CREATE UNIQUE INDEX idx_post_likes_external
                 ON post_likes(external_id) WHERE external_id IS NOT NULL;
             CREATE UNIQUE INDEX idx_post_likes_summary
                 ON post_likes(post_id, summary) WHERE external_id IS NULL;
             CREATE UNIQUE INDEX idx_comment_likes_external
                 ON comment_likes(external_id) WHERE external_id IS NOT NULL;
             CREATE UNIQUE INDEX idx_comment_likes_summary
                 ON comment_likes(comment_id, summary) WHERE external_id IS NULL;",
        )
    })?;

    Ok(())
}

/// Run a migration if it hasn't been applied yet.
/// The migration function receives the connection and should execute its SQL.
fn run_migration<F>(conn: &Connection, version: i64, migrate: F) -> Result<()>
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    let already_applied: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM schema_version WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    if !already_applied {
        migrate(conn).with_context(|| format!("Migration v{version} failed"))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
