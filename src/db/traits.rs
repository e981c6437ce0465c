// Database trait: backend-agnostic async interface for all DB operations.
//
// Implementor: SqliteDatabase (wraps rusqlite). All methods are async so a
// natively async backend can slot in behind the same interface later.
//
// The trait mirrors the queries.rs function signatures. Each method is its
// own transaction; nothing here gives isolation across calls.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{AuthorRating, EditQueueEntry, TweetSnapshot};

#[async_trait]
pub trait Database: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    // --- Scan state ---

    /// Get a scan state value by key (e.g., "crawl:rust").
    async fn get_scan_state(&self, key: &str) -> Result<Option<String>>;

    /// Set a scan state value (upsert).
    async fn set_scan_state(&self, key: &str, value: &str) -> Result<()>;

    async fn delete_scan_state(&self, key: &str) -> Result<()>;

    /// Get all scan state entries as (key, value) pairs.
    async fn get_all_scan_state(&self) -> Result<Vec<(String, String)>>;

    // --- Candidates ---

    /// Persist a page of snapshots atomically, skipping published URLs.
    async fn save_snapshots(&self, snapshots: &[TweetSnapshot]) -> Result<usize>;

    async fn get_snapshot(&self, id: &str) -> Result<Option<TweetSnapshot>>;

    /// Delete a candidate by id. Returns whether it existed.
    async fn delete_snapshot(&self, id: &str) -> Result<bool>;

    async fn get_fastest_growing(&self) -> Result<Option<TweetSnapshot>>;

    /// Oldest candidate predicted to meet `threshold` at `now`, falling back
    /// to the best predicted candidate. `None` only for an empty set.
    async fn get_oldest_above_threshold(
        &self,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<TweetSnapshot>>;

    /// Least recently refreshed candidate.
    async fn get_oldest_any(&self) -> Result<Option<TweetSnapshot>>;

    async fn get_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<TweetSnapshot>>;

    async fn candidate_count(&self) -> Result<i64>;

    // --- Publishing ---

    async fn is_published(&self, url: &str) -> Result<bool>;

    /// Returns `true` only the first time a URL is marked.
    async fn mark_published(&self, url: &str) -> Result<bool>;

    async fn published_count(&self) -> Result<i64>;

    async fn enqueue_for_edit(&self, snapshot: &TweetSnapshot) -> Result<i64>;

    /// Mark published and enqueue atomically. `true` only for the first
    /// publish of a URL; nothing is written otherwise or on failure.
    async fn publish(&self, snapshot: &TweetSnapshot) -> Result<bool>;

    async fn pending_edits(&self, limit: u32) -> Result<Vec<EditQueueEntry>>;

    async fn edit_queue_len(&self) -> Result<i64>;

    // --- Author ratings ---

    async fn get_author_rating(&self, author: &str) -> Result<Option<AuthorRating>>;

    async fn upsert_author_rating(&self, author: &str, rating: &AuthorRating) -> Result<()>;
}
