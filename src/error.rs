// Error types for the crawl path.
//
// Most of the crate uses anyhow::Result with context, like any other
// pipeline stage. The crawl source is the one seam where callers must tell
// throttling and cancellation apart from plain failures, so it gets a
// typed error. Throttling comes only from an HTTP status or a response
// error code; error text is never inspected for it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    /// The platform refused the request because the identity exceeded its
    /// rate limit. Drives governor backoff; never surfaced as a failure.
    #[error("rate limited by the platform")]
    RateLimited,

    /// The root cancellation signal fired while waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// Anything else: connection problems, bad status codes, undecodable
    /// bodies. Fatal to the current crawl attempt.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl CrawlError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, CrawlError::RateLimited)
    }
}
