// Database queries: CRUD operations for all tables.
//
// Every database interaction goes through this module. This keeps SQL
// contained in one place and gives the rest of the app clean Rust interfaces.
// Queries that can legitimately find nothing return `Option`, so "no rows"
// never surfaces as an error.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{AuthorRating, EditQueueEntry, TweetSnapshot};

const SNAPSHOT_COLUMNS: &str = "id, author, text, url, likes, retweets, replies, views, \
     posted_at, captured_at, growth_speed";

// --- Scan state ---

/// Get a scan state value by key (e.g., "crawl:rust").
pub fn get_scan_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM scan_state WHERE key = ?1")?;
    let result = stmt.query_row(params![key], |row| row.get(0)).optional()?;
    Ok(result)
}

/// Set a scan state value (upsert).
pub fn set_scan_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO scan_state (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
        params![key, value],
    )?;
    Ok(())
}

pub fn delete_scan_state(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM scan_state WHERE key = ?1", params![key])?;
    Ok(())
}

/// Get all scan state entries as (key, value) pairs, sorted by key.
pub fn get_all_scan_state(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT key, value FROM scan_state ORDER BY key")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// --- Candidate snapshots ---

/// Upsert a page of snapshots in one transaction. Rows whose URL has
/// already been published are skipped. Returns how many rows were written.
pub fn save_snapshots(conn: &Connection, snapshots: &[TweetSnapshot]) -> Result<usize> {
    let tx = conn
        .unchecked_transaction()
        .context("Failed to start snapshot transaction")?;

    let mut written = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO tweet_snapshots (id, author, text, url, likes, retweets, replies, views,
                                          posted_at, captured_at, growth_speed)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
             WHERE NOT EXISTS (SELECT 1 FROM published_urls WHERE url = ?4)
             ON CONFLICT(id) DO UPDATE SET
                author = excluded.author,
                text = excluded.text,
                url = excluded.url,
                likes = excluded.likes,
                retweets = excluded.retweets,
                replies = excluded.replies,
                views = excluded.views,
                posted_at = excluded.posted_at,
                captured_at = excluded.captured_at,
                growth_speed = excluded.growth_speed",
        )?;

        for s in snapshots {
            written += stmt.execute(params![
                s.id,
                s.author,
                s.text,
                s.url,
                s.likes,
                s.retweets,
                s.replies,
                s.views,
                s.posted_at.timestamp(),
                s.captured_at.timestamp(),
                s.growth_speed,
            ])?;
        }
    }

    tx.commit().context("Failed to commit snapshot page")?;
    Ok(written)
}

pub fn get_snapshot(conn: &Connection, id: &str) -> Result<Option<TweetSnapshot>> {
    let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM tweet_snapshots WHERE id = ?1");
    let result = conn
        .query_row(&sql, params![id], snapshot_from_row)
        .optional()?;
    Ok(result)
}

/// Delete one candidate. Returns whether a row was removed.
pub fn delete_snapshot(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM tweet_snapshots WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

/// The candidate with the highest growth speed.
pub fn get_fastest_growing(conn: &Connection) -> Result<Option<TweetSnapshot>> {
    let sql = format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM tweet_snapshots
         ORDER BY growth_speed DESC, posted_at ASC
         LIMIT 1"
    );
    let result = conn.query_row(&sql, [], snapshot_from_row).optional()?;
    Ok(result)
}

/// The oldest candidate whose predicted rating (growth speed times age)
/// still meets `threshold`. When none does, the candidate with the highest
/// predicted rating. `None` only when the working set is empty.
pub fn get_oldest_above_threshold(
    conn: &Connection,
    threshold: f64,
    now: DateTime<Utc>,
) -> Result<Option<TweetSnapshot>> {
    let now = now.timestamp();

    let sql = format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM tweet_snapshots
         WHERE growth_speed * MAX(?2 - posted_at, 0) >= ?1
         ORDER BY posted_at ASC
         LIMIT 1"
    );
    if let Some(found) = conn
        .query_row(&sql, params![threshold, now], snapshot_from_row)
        .optional()?
    {
        return Ok(Some(found));
    }

    let sql = format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM tweet_snapshots
         ORDER BY growth_speed * MAX(?1 - posted_at, 0) DESC, posted_at ASC
         LIMIT 1"
    );
    let fallback = conn
        .query_row(&sql, params![now], snapshot_from_row)
        .optional()?;
    Ok(fallback)
}

/// The candidate refreshed least recently.
pub fn get_oldest_any(conn: &Connection) -> Result<Option<TweetSnapshot>> {
    let sql = format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM tweet_snapshots
         ORDER BY captured_at ASC, posted_at ASC
         LIMIT 1"
    );
    let result = conn.query_row(&sql, [], snapshot_from_row).optional()?;
    Ok(result)
}

/// Every candidate posted strictly before `cutoff`, oldest first.
pub fn get_older_than(conn: &Connection, cutoff: DateTime<Utc>) -> Result<Vec<TweetSnapshot>> {
    let sql = format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM tweet_snapshots
         WHERE posted_at < ?1
         ORDER BY posted_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![cutoff.timestamp()], snapshot_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn candidate_count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM tweet_snapshots", [], |row| row.get(0))?;
    Ok(count)
}

// --- Publishing ---

pub fn is_published(conn: &Connection, url: &str) -> Result<bool> {
    let found: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM published_urls WHERE url = ?1",
        params![url],
        |row| row.get(0),
    )?;
    Ok(found)
}

/// Record a URL as published. Returns `true` only on first insertion.
pub fn mark_published(conn: &Connection, url: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO published_urls (url) VALUES (?1)",
        params![url],
    )?;
    Ok(inserted > 0)
}

pub fn published_count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM published_urls", [], |row| row.get(0))?;
    Ok(count)
}

/// Append a candidate to the edit queue and return the entry id.
pub fn enqueue_for_edit(conn: &Connection, snapshot: &TweetSnapshot) -> Result<i64> {
    let payload = serde_json::to_string(snapshot)?;
    conn.execute(
        "INSERT INTO edit_queue (tweet_id, url, payload) VALUES (?1, ?2, ?3)",
        params![snapshot.id, snapshot.url, payload],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Mark the URL published and enqueue the candidate in one transaction.
///
/// Returns `false`, writing nothing, when the URL was already published.
/// If the enqueue fails the mark is rolled back, so a retry hands it off.
pub fn publish(conn: &Connection, snapshot: &TweetSnapshot) -> Result<bool> {
    let tx = conn
        .unchecked_transaction()
        .context("Failed to start publish transaction")?;

    if !mark_published(&tx, &snapshot.url)? {
        return Ok(false);
    }
    enqueue_for_edit(&tx, snapshot)?;

    tx.commit().context("Failed to commit publish transaction")?;
    Ok(true)
}

/// Oldest queued entries first.
pub fn pending_edits(conn: &Connection, limit: u32) -> Result<Vec<EditQueueEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, payload, enqueued_at FROM edit_queue
         ORDER BY id ASC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(id, payload, enqueued_at)| {
            let snapshot = serde_json::from_str(&payload)
                .with_context(|| format!("Corrupt edit queue payload for entry {id}"))?;
            Ok(EditQueueEntry {
                id,
                snapshot,
                enqueued_at,
            })
        })
        .collect()
}

pub fn edit_queue_len(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM edit_queue", [], |row| row.get(0))?;
    Ok(count)
}

// --- Author ratings ---

pub fn get_author_rating(conn: &Connection, author: &str) -> Result<Option<AuthorRating>> {
    let result = conn
        .query_row(
            "SELECT positive, negative FROM author_ratings WHERE author = ?1",
            params![author],
            |row| {
                Ok(AuthorRating {
                    positive: row.get(0)?,
                    negative: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(result)
}

/// Save or replace an author's rating.
pub fn upsert_author_rating(conn: &Connection, author: &str, rating: &AuthorRating) -> Result<()> {
    conn.execute(
        "INSERT INTO author_ratings (author, positive, negative, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(author) DO UPDATE SET
            positive = ?2,
            negative = ?3,
            updated_at = datetime('now')",
        params![author, rating.positive, rating.negative],
    )?;
    Ok(())
}

// --- Row mapping ---

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<TweetSnapshot> {
    Ok(TweetSnapshot {
        id: row.get(0)?,
        author: row.get(1)?,
        text: row.get(2)?,
        url: row.get(3)?,
        likes: row.get(4)?,
        retweets: row.get(5)?,
        replies: row.get(6)?,
        views: row.get(7)?,
        posted_at: timestamp_column(row, 8)?,
        captured_at: timestamp_column(row, 9)?,
        growth_speed: row.get(10)?,
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let secs: i64 = row.get(idx)?;
    DateTime::from_timestamp(secs, 0).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::create_tables;
    use chrono::Duration;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    fn snapshot(id: &str, growth_speed: f64, posted_at: DateTime<Utc>) -> TweetSnapshot {
        TweetSnapshot {
            id: id.to_string(),
            author: "alice".to_string(),
            text: format!("tweet {id}"),
            url: format!("https://x.com/alice/status/{id}"),
            likes: 10,
            retweets: 2,
            replies: 1,
            views: 100,
            posted_at,
            captured_at: posted_at,
            growth_speed,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_800_000_000, 0).unwrap()
    }

    #[test]
    fn test_scan_state_roundtrip() {
        let conn = test_db();
        assert_eq!(get_scan_state(&conn, "crawl:rust").unwrap(), None);

        set_scan_state(&conn, "crawl:rust", "abc123").unwrap();
        assert_eq!(
            get_scan_state(&conn, "crawl:rust").unwrap(),
            Some("abc123".to_string())
        );

        // Upsert overwrites
        set_scan_state(&conn, "crawl:rust", "def456").unwrap();
        assert_eq!(
            get_scan_state(&conn, "crawl:rust").unwrap(),
            Some("def456".to_string())
        );

        delete_scan_state(&conn, "crawl:rust").unwrap();
        assert_eq!(get_scan_state(&conn, "crawl:rust").unwrap(), None);
    }

    #[test]
    fn test_save_snapshots_upserts_by_id() {
        let conn = test_db();
        let mut s = snapshot("1", 0.5, now());
        assert_eq!(save_snapshots(&conn, &[s.clone()]).unwrap(), 1);

        s.likes = 99;
        s.growth_speed = 0.7;
        save_snapshots(&conn, &[s]).unwrap();

        assert_eq!(candidate_count(&conn).unwrap(), 1);
        let loaded = get_snapshot(&conn, "1").unwrap().unwrap();
        assert_eq!(loaded.likes, 99);
        assert!((loaded.growth_speed - 0.7).abs() < f64::EPSILON);
        assert_eq!(loaded.posted_at, now());
    }

    #[test]
    fn test_save_snapshots_skips_published_urls() {
        let conn = test_db();
        let published = snapshot("1", 0.5, now());
        mark_published(&conn, &published.url).unwrap();

        let written = save_snapshots(&conn, &[published, snapshot("2", 0.5, now())]).unwrap();
        assert_eq!(written, 1);
        assert!(get_snapshot(&conn, "1").unwrap().is_none());
        assert!(get_snapshot(&conn, "2").unwrap().is_some());
    }

    #[test]
    fn test_fastest_growing() {
        let conn = test_db();
        assert!(get_fastest_growing(&conn).unwrap().is_none());

        let page: Vec<_> = [("a", 0.5), ("b", 0.9), ("c", 0.2)]
            .iter()
            .map(|(id, g)| snapshot(id, *g, now()))
            .collect();
        save_snapshots(&conn, &page).unwrap();

        assert_eq!(get_fastest_growing(&conn).unwrap().unwrap().id, "b");
        assert!(delete_snapshot(&conn, "b").unwrap());
        assert!(!delete_snapshot(&conn, "b").unwrap());
        assert_eq!(get_fastest_growing(&conn).unwrap().unwrap().id, "a");
    }

    #[test]
    fn test_oldest_above_threshold_prefers_oldest_qualifying() {
        let conn = test_db();
        // predicted ratings at now(): 50, 120, 80 (all 100s old)
        let posted = now() - Duration::seconds(100);
        save_snapshots(
            &conn,
            &[
                snapshot("fifty", 0.5, posted),
                snapshot("one-twenty", 1.2, posted),
                snapshot("eighty", 0.8, posted),
            ],
        )
        .unwrap();

        let found = get_oldest_above_threshold(&conn, 100.0, now()).unwrap().unwrap();
        assert_eq!(found.id, "one-twenty");

        // A younger candidate above the threshold loses to the older one
        save_snapshots(&conn, &[snapshot("young", 10.0, now() - Duration::seconds(50))]).unwrap();
        let found = get_oldest_above_threshold(&conn, 100.0, now()).unwrap().unwrap();
        assert_eq!(found.id, "one-twenty");
    }

    #[test]
    fn test_oldest_above_threshold_falls_back_to_best_predicted() {
        let conn = test_db();
        assert!(get_oldest_above_threshold(&conn, 100.0, now())
            .unwrap()
            .is_none());

        let posted = now() - Duration::seconds(100);
        save_snapshots(
            &conn,
            &[snapshot("fifty", 0.5, posted), snapshot("eighty", 0.8, posted)],
        )
        .unwrap();

        let found = get_oldest_above_threshold(&conn, 100.0, now()).unwrap().unwrap();
        assert_eq!(found.id, "eighty");
    }

    #[test]
    fn test_oldest_any_is_least_recently_captured() {
        let conn = test_db();
        let mut a = snapshot("a", 0.1, now());
        a.captured_at = now() + Duration::seconds(30);
        let b = snapshot("b", 0.1, now());
        save_snapshots(&conn, &[a, b]).unwrap();

        assert_eq!(get_oldest_any(&conn).unwrap().unwrap().id, "b");
    }

    #[test]
    fn test_older_than_cutoff() {
        let conn = test_db();
        save_snapshots(
            &conn,
            &[
                snapshot("23h", 0.1, now() - Duration::hours(23)),
                snapshot("25h", 0.1, now() - Duration::hours(25)),
                snapshot("1h", 0.1, now() - Duration::hours(1)),
            ],
        )
        .unwrap();

        let stale = get_older_than(&conn, now() - Duration::hours(24)).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "25h");
    }

    #[test]
    fn test_mark_published_only_first_time() {
        let conn = test_db();
        let url = "https://x.com/alice/status/1";
        assert!(!is_published(&conn, url).unwrap());
        assert!(mark_published(&conn, url).unwrap());
        assert!(!mark_published(&conn, url).unwrap());
        assert!(is_published(&conn, url).unwrap());
        assert_eq!(published_count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_publish_enqueues_only_first_time() {
        let conn = test_db();
        let s = snapshot("8", 2.0, now());
        assert!(publish(&conn, &s).unwrap());
        assert!(!publish(&conn, &s).unwrap());
        assert_eq!(published_count(&conn).unwrap(), 1);
        assert_eq!(edit_queue_len(&conn).unwrap(), 1);
    }

    #[test]
    fn test_publish_rolls_back_mark_when_enqueue_fails() {
        let conn = test_db();
        let s = snapshot("9", 2.0, now());

        conn.execute_batch("ALTER TABLE edit_queue RENAME TO edit_queue_off")
            .unwrap();
        assert!(publish(&conn, &s).is_err());
        assert!(!is_published(&conn, &s.url).unwrap());

        conn.execute_batch("ALTER TABLE edit_queue_off RENAME TO edit_queue")
            .unwrap();
        assert!(publish(&conn, &s).unwrap());
        assert_eq!(edit_queue_len(&conn).unwrap(), 1);
    }

    #[test]
    fn test_edit_queue_roundtrip() {
        let conn = test_db();
        let s = snapshot("7", 1.5, now());
        let id = enqueue_for_edit(&conn, &s).unwrap();
        assert!(id > 0);
        assert_eq!(edit_queue_len(&conn).unwrap(), 1);

        let pending = pending_edits(&conn, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].snapshot, s);
    }

    #[test]
    fn test_author_rating_upsert() {
        let conn = test_db();
        assert!(get_author_rating(&conn, "alice").unwrap().is_none());

        let rating = AuthorRating {
            positive: 20,
            negative: 10,
        };
        upsert_author_rating(&conn, "alice", &rating).unwrap();
        assert_eq!(get_author_rating(&conn, "alice").unwrap(), Some(rating));

        let rating = AuthorRating {
            positive: 1,
            negative: 2,
        };
        upsert_author_rating(&conn, "alice", &rating).unwrap();
        assert_eq!(get_author_rating(&conn, "alice").unwrap(), Some(rating));
    }
}
