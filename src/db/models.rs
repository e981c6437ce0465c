// Data models: Rust structs that map to database rows.
//
// These are the types that flow through the application. They're separate
// from the database queries so other modules can use them without depending
// on rusqlite directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::twitter::tweets::Tweet;

/// A tracked candidate: the tweet as last observed plus its growth speed.
///
/// Only built from a fresh ranking assessment, so the growth speed always
/// matches the counters and capture time stored next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TweetSnapshot {
    pub id: String,
    pub author: String,
    pub text: String,
    pub url: String,
    pub likes: i64,
    pub retweets: i64,
    pub replies: i64,
    pub views: i64,
    pub posted_at: DateTime<Utc>,
    pub captured_at: DateTime<Utc>,
    /// Admission score per second of life at capture time.
    pub growth_speed: f64,
}

impl TweetSnapshot {
    pub fn capture(tweet: Tweet, captured_at: DateTime<Utc>, growth_speed: f64) -> Self {
        Self {
            id: tweet.id,
            author: tweet.author,
            text: tweet.text,
            url: tweet.url,
            likes: tweet.likes,
            retweets: tweet.retweets,
            replies: tweet.replies,
            views: tweet.views,
            posted_at: tweet.posted_at,
            captured_at,
            growth_speed,
        }
    }

    /// Seconds since the tweet was posted (never negative).
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.posted_at).num_seconds().max(0)
    }

    /// Score the tweet would have now if it kept growing at the same speed.
    pub fn predicted_rating(&self, now: DateTime<Utc>) -> f64 {
        self.growth_speed * self.age_secs(now) as f64
    }
}

/// Audience sentiment towards an author, maintained by the moderation
/// listener. Read-only to the crawler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRating {
    pub positive: i64,
    pub negative: i64,
}

impl AuthorRating {
    /// Score multiplier: each net positive reaction adds 10%.
    pub fn multiplier(&self) -> f64 {
        1.0 + (self.positive - self.negative) as f64 / 10.0
    }
}

/// Progress of one query's current crawl window, kept in scan state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlProgress {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    /// Cursor of the next page, valid only for `identity`.
    pub cursor: Option<String>,
    pub identity: Option<String>,
}

/// A candidate handed to the downstream edit/publish queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditQueueEntry {
    pub id: i64,
    pub snapshot: TweetSnapshot,
    pub enqueued_at: String,
}
