// Staleness sweep: drop every candidate older than the maximum age.
//
// This is the only thing bounding the working set, so it runs on its own
// hourly task regardless of how busy the crawl tasks are. Age is measured
// from the tweet's post time, not from when we last looked at it.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::db::Database;

/// Default maximum candidate age.
pub const DEFAULT_MAX_AGE_HOURS: i64 = 24;

/// Delete candidates posted before `now - max_age`. Returns how many went.
///
/// A failed delete is logged and skipped; the next sweep retries it.
pub async fn run(db: &dyn Database, max_age: Duration, now: DateTime<Utc>) -> Result<usize> {
    let cutoff = now - max_age;
    let stale = db
        .get_older_than(cutoff)
        .await
        .context("Failed to list stale candidates")?;

    let mut deleted = 0;
    for snapshot in &stale {
        match db.delete_snapshot(&snapshot.id).await {
            Ok(true) => deleted += 1,
            Ok(false) => {}
            Err(e) => warn!(id = %snapshot.id, error = %e, "Failed to delete stale candidate"),
        }
    }

    if deleted > 0 {
        info!(
            deleted = deleted,
            cutoff = %cutoff,
            "Swept stale candidates"
        );
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::TweetSnapshot;

    fn snapshot(id: &str, posted_at: DateTime<Utc>) -> TweetSnapshot {
        TweetSnapshot {
            id: id.to_string(),
            author: "alice".to_string(),
            text: String::new(),
            url: format!("https://x.com/alice/status/{id}"),
            likes: 10,
            retweets: 0,
            replies: 0,
            views: 0,
            posted_at,
            captured_at: posted_at,
            growth_speed: 0.1,
        }
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_expired() {
        let db = crate::db::in_memory().unwrap();
        let now = Utc::now();
        db.save_snapshots(&[
            snapshot("23h", now - Duration::hours(23)),
            snapshot("25h", now - Duration::hours(25)),
            snapshot("1h", now - Duration::hours(1)),
        ])
        .await
        .unwrap();

        let deleted = run(db.as_ref(), Duration::hours(DEFAULT_MAX_AGE_HOURS), now)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(db.get_snapshot("25h").await.unwrap().is_none());
        assert!(db.get_snapshot("23h").await.unwrap().is_some());
        assert!(db.get_snapshot("1h").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_empty_set() {
        let db = crate::db::in_memory().unwrap();
        assert_eq!(run(db.as_ref(), Duration::hours(24), Utc::now()).await.unwrap(), 0);
    }
}
