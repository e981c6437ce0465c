// Database schema: table creation.
//
// A `schema_version` table records which schema revision the file was created
// with so later revisions can migrate it forward. Timestamps the ranking
// queries do arithmetic on are INTEGER unix seconds; bookkeeping timestamps
// are SQLite datetime text.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// Idempotent, safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Working set of candidates, one row per tweet id
        CREATE TABLE IF NOT EXISTS tweet_snapshots (
            id TEXT PRIMARY KEY,
            author TEXT NOT NULL,
            text TEXT NOT NULL,
            url TEXT NOT NULL,
            likes INTEGER NOT NULL DEFAULT 0,
            retweets INTEGER NOT NULL DEFAULT 0,
            replies INTEGER NOT NULL DEFAULT 0,
            views INTEGER NOT NULL DEFAULT 0,
            posted_at INTEGER NOT NULL,        -- unix seconds
            captured_at INTEGER NOT NULL,      -- unix seconds
            growth_speed REAL NOT NULL
        );

        -- Every URL ever handed downstream; the publish dedup gate
        CREATE TABLE IF NOT EXISTS published_urls (
            url TEXT PRIMARY KEY,
            published_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Handoff to the edit/publish pipeline
        CREATE TABLE IF NOT EXISTS edit_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tweet_id TEXT NOT NULL,
            url TEXT NOT NULL,
            payload TEXT NOT NULL,             -- JSON TweetSnapshot
            enqueued_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Author sentiment, written by the moderation listener
        CREATE TABLE IF NOT EXISTS author_ratings (
            author TEXT PRIMARY KEY,
            positive INTEGER NOT NULL DEFAULT 0,
            negative INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Crawl progress and other resumable state
        CREATE TABLE IF NOT EXISTS scan_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_snapshots_growth
            ON tweet_snapshots(growth_speed);

        CREATE INDEX IF NOT EXISTS idx_snapshots_posted
            ON tweet_snapshots(posted_at);

        CREATE INDEX IF NOT EXISTS idx_snapshots_captured
            ON tweet_snapshots(captured_at);
        ",
    )
    .context("Failed to create database tables")?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

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
