// Admission score and growth speed.
//
// The score is the tweet's likes scaled by how the audience has reacted to
// the author before. Growth speed normalizes the score by how long the tweet
// has been live, so a young tweet with modest numbers can outrank an old
// one that has stopped moving.
//
// `score = likes * (1 + (positive - negative) / 10)`
// `growth_speed = score / max(1s, captured_at - posted_at)`

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::ratings::RatingSource;
use crate::db::models::{AuthorRating, TweetSnapshot};
use crate::twitter::tweets::Tweet;

/// Lower bound on a tweet's live time, so a tweet captured the second it
/// was posted does not divide by zero.
pub const MIN_LIVE_SECONDS: f64 = 1.0;

/// Result of scoring one tweet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    /// Score is strictly above the admission threshold.
    pub admit: bool,
    pub score: f64,
    pub growth_speed: f64,
}

impl Assessment {
    /// A candidate whose growth speed is not positive is dead weight.
    pub fn is_dead(&self) -> bool {
        self.growth_speed <= 0.0
    }
}

/// Scores tweets against a fixed admission threshold.
#[derive(Debug, Clone, Copy)]
pub struct RankingEngine {
    threshold: f64,
}

impl RankingEngine {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// The admission threshold currently in force.
    pub fn current_top(&self) -> f64 {
        self.threshold
    }

    /// Score a tweet given its author's rating (if one exists).
    pub fn check(
        &self,
        tweet: &Tweet,
        rating: Option<AuthorRating>,
        captured_at: DateTime<Utc>,
    ) -> Assessment {
        let multiplier = rating.map_or(1.0, |r| r.multiplier());
        let score = tweet.likes as f64 * multiplier;

        let live_ms = (captured_at - tweet.posted_at).num_milliseconds() as f64;
        let live_seconds = (live_ms / 1000.0).max(MIN_LIVE_SECONDS);

        Assessment {
            admit: score > self.threshold,
            score,
            growth_speed: score / live_seconds,
        }
    }

    /// Look up the author's rating and score the tweet.
    ///
    /// A missing rating is neutral. Any other lookup failure aborts this
    /// tweet only; nothing is written.
    pub async fn evaluate(
        &self,
        tweet: &Tweet,
        ratings: &dyn RatingSource,
        captured_at: DateTime<Utc>,
    ) -> Result<Assessment> {
        let rating = ratings
            .author_rating(&tweet.author)
            .await
            .with_context(|| format!("Failed to look up rating for {}", tweet.author))?;
        Ok(self.check(tweet, rating, captured_at))
    }

    /// Score a tweet and build the snapshot that would be stored for it.
    pub async fn capture(
        &self,
        tweet: Tweet,
        ratings: &dyn RatingSource,
        captured_at: DateTime<Utc>,
    ) -> Result<(TweetSnapshot, Assessment)> {
        let assessment = self.evaluate(&tweet, ratings, captured_at).await?;
        let snapshot = TweetSnapshot::capture(tweet, captured_at, assessment.growth_speed);
        Ok((snapshot, assessment))
    }
}
