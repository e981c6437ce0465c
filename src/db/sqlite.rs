// SqliteDatabase: rusqlite backend implementing the Database trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Sync.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// Serializing every call through one connection is what makes each trait
// method its own atomic unit.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{AuthorRating, EditQueueEntry, TweetSnapshot};
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
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn get_scan_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        queries::get_scan_state(&conn, key)
    }

    async fn set_scan_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::set_scan_state(&conn, key, value)
    }

    async fn delete_scan_state(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::delete_scan_state(&conn, key)
    }

    async fn get_all_scan_state(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().await;
        queries::get_all_scan_state(&conn)
    }

    async fn save_snapshots(&self, snapshots: &[TweetSnapshot]) -> Result<usize> {
        let conn = self.conn.lock().await;
        queries::save_snapshots(&conn, snapshots)
    }

    async fn get_snapshot(&self, id: &str) -> Result<Option<TweetSnapshot>> {
        let conn = self.conn.lock().await;
        queries::get_snapshot(&conn, id)
    }

    async fn delete_snapshot(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::delete_snapshot(&conn, id)
    }

    async fn get_fastest_growing(&self) -> Result<Option<TweetSnapshot>> {
        let conn = self.conn.lock().await;
        queries::get_fastest_growing(&conn)
    }

    async fn get_oldest_above_threshold(
        &self,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<TweetSnapshot>> {
        let conn = self.conn.lock().await;
        queries::get_oldest_above_threshold(&conn, threshold, now)
    }

    async fn get_oldest_any(&self) -> Result<Option<TweetSnapshot>> {
        let conn = self.conn.lock().await;
        queries::get_oldest_any(&conn)
    }

    async fn get_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<TweetSnapshot>> {
        let conn = self.conn.lock().await;
        queries::get_older_than(&conn, cutoff)
    }

    async fn candidate_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::candidate_count(&conn)
    }

    async fn is_published(&self, url: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::is_published(&conn, url)
    }

    async fn mark_published(&self, url: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::mark_published(&conn, url)
    }

    async fn published_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::published_count(&conn)
    }

    async fn enqueue_for_edit(&self, snapshot: &TweetSnapshot) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::enqueue_for_edit(&conn, snapshot)
    }

    async fn publish(&self, snapshot: &TweetSnapshot) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::publish(&conn, snapshot)
    }

    async fn pending_edits(&self, limit: u32) -> Result<Vec<EditQueueEntry>> {
        let conn = self.conn.lock().await;
        queries::pending_edits(&conn, limit)
    }

    async fn edit_queue_len(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::edit_queue_len(&conn)
    }

    async fn get_author_rating(&self, author: &str) -> Result<Option<AuthorRating>> {
        let conn = self.conn.lock().await;
        queries::get_author_rating(&conn, author)
    }

    async fn upsert_author_rating(&self, author: &str, rating: &AuthorRating) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::upsert_author_rating(&conn, author, rating)
    }
}
