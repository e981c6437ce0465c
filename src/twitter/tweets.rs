// Tweets as the crawler sees them: just the fields triage needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A simplified tweet as returned by search or lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub author: String,
    pub text: String,
    /// Permanent link; the dedup key for publishing.
    pub url: String,
    pub likes: i64,
    pub retweets: i64,
    pub replies: i64,
    pub views: i64,
    /// Post time as reported by the platform.
    pub posted_at: DateTime<Utc>,
}

/// Build the canonical permanent URL for a tweet.
pub fn permanent_url(author: &str, id: &str) -> String {
    format!("https://x.com/{}/status/{}", author.trim_start_matches('@'), id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_url_strips_at_sign() {
        assert_eq!(
            permanent_url("@rustlang", "1234"),
            "https://x.com/rustlang/status/1234"
        );
        assert_eq!(permanent_url("rustlang", "9"), "https://x.com/rustlang/status/9");
    }
}
