// Author rating lookups.
//
// Ratings are written by the moderation listener and only read here. Every
// crawled page asks for the same handful of authors, so lookups go through
// a small TTL cache. The cache is the only owner of its map; callers reach
// it through `RatingCache::author_rating` and never hold the lock across a
// lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::db::models::AuthorRating;
use crate::db::Database;

/// Default time a looked-up rating stays fresh.
pub const DEFAULT_RATING_TTL: Duration = Duration::from_secs(5 * 60);

/// Where author ratings come from. `Ok(None)` means the author has no
/// rating yet, which is not an error.
#[async_trait]
pub trait RatingSource: Send + Sync {
    async fn author_rating(&self, author: &str) -> Result<Option<AuthorRating>>;
}

/// Ratings read straight from the database.
pub struct DbRatings {
    db: Arc<dyn Database>,
}

impl DbRatings {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RatingSource for DbRatings {
    async fn author_rating(&self, author: &str) -> Result<Option<AuthorRating>> {
        self.db.get_author_rating(author).await
    }
}

struct CachedRating {
    rating: Option<AuthorRating>,
    fetched_at: Instant,
}

/// TTL cache in front of a `RatingSource`. Misses are cached too; failed
/// lookups are not.
pub struct RatingCache {
    source: Arc<dyn RatingSource>,
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedRating>>,
}

impl RatingCache {
    pub fn new(source: Arc<dyn RatingSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cached authors, fresh or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget one author so the next lookup goes to the source.
    pub fn invalidate(&self, author: &str) {
        self.lock().remove(author);
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.fetched_at) < self.ttl);
        before - entries.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedRating>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RatingSource for RatingCache {
    async fn author_rating(&self, author: &str) -> Result<Option<AuthorRating>> {
        {
            let entries = self.lock();
            if let Some(cached) = entries.get(author) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.rating);
                }
            }
        }

        let rating = self.source.author_rating(author).await?;
        debug!(author = author, found = rating.is_some(), "Fetched author rating");

        self.lock().insert(
            author.to_string(),
            CachedRating {
                rating,
                fetched_at: Instant::now(),
            },
        );
        Ok(rating)
    }
}
