// HTTP client for the crawl source: search and lookup by id.
//
// A thin reqwest wrapper with one generic GET helper, authenticated per
// request with the checked-out identity's bearer token. The client does no
// pacing of its own; the Crawler sleeps on the identity's governor before
// every call and feeds throttling back into it.
//
// Throttling arrives either as HTTP 429 or as a 200 carrying error code 88,
// and both become CrawlError::RateLimited. A missing tweet (404 or error
// code 144) is Ok(None), never an error.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::session::Session;
use super::tweets::{permanent_url, Tweet};
use crate::error::CrawlError;

/// Default API endpoint for search and lookup.
pub const DEFAULT_API_URL: &str = "https://api.x.com/2";

/// Results requested per search page unless configured otherwise.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Largest page the search endpoint serves.
pub const MAX_PAGE_SIZE: usize = 100;

/// Platform error code for "rate limit exceeded".
const RATE_LIMIT_CODE: i64 = 88;

/// Platform error code for "no status found with that id".
const NOT_FOUND_CODE: i64 = 144;

/// One page of search results, newest first.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub tweets: Vec<Tweet>,
    /// Opaque token for the next (older) page; `None` when exhausted.
    pub next_cursor: Option<String>,
}

/// The crawl source seam. The HTTP client implements it for production;
/// tests script it in-process.
#[async_trait]
pub trait TimelineSource: Send + Sync {
    /// Fetch one page of results for a fully built query string.
    async fn search_page(
        &self,
        session: &Session,
        query: &str,
        cursor: Option<&str>,
    ) -> Result<SearchPage, CrawlError>;

    /// Fetch the live state of one tweet. `Ok(None)` if it no longer exists.
    async fn lookup(&self, session: &Session, id: &str) -> Result<Option<Tweet>, CrawlError>;
}

/// Authenticated HTTP client for the search and lookup endpoints.
pub struct HttpTimelineClient {
    client: reqwest::Client,
    base_url: String,
    page_size: String,
}

impl HttpTimelineClient {
    /// Create a client pointing at the given base URL.
    pub fn new(base_url: &str, page_size: usize) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("trawler/0.1")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE).to_string(),
        })
    }

    /// GET an endpoint as the given identity. Returns the raw body, or
    /// `None` on 404.
    async fn api_get(
        &self,
        session: &Session,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Option<String>, CrawlError> {
        let url = format!("{}/{}", self.base_url, path);

        debug!(path = path, identity = session.label(), "API GET request");

        let response = self
            .client
            .get(&url)
            .bearer_auth(session.token())
            .query(params)
            .send()
            .await
            .with_context(|| format!("Request failed: {path}"))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CrawlError::RateLimited);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{path} returned {status}: {body}").into());
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read {path} response"))?;
        Ok(Some(body))
    }
}

#[async_trait]
impl TimelineSource for HttpTimelineClient {
    async fn search_page(
        &self,
        session: &Session,
        query: &str,
        cursor: Option<&str>,
    ) -> Result<SearchPage, CrawlError> {
        let mut params: Vec<(&str, &str)> = vec![("q", query), ("count", &self.page_size)];
        if let Some(c) = cursor {
            params.push(("cursor", c));
        }

        let Some(body) = self.api_get(session, "search", &params).await? else {
            return Ok(SearchPage::default());
        };
        decode_search(&body)
    }

    async fn lookup(&self, session: &Session, id: &str) -> Result<Option<Tweet>, CrawlError> {
        let path = format!("tweets/{id}");
        match self.api_get(session, &path, &[]).await? {
            Some(body) => decode_lookup(&body),
            None => Ok(None),
        }
    }
}

/// Decode a search response body.
pub fn decode_search(body: &str) -> Result<SearchPage, CrawlError> {
    let response: SearchResponse = serde_json::from_str(body)
        .context("Failed to deserialize search response")?;

    if check_errors(&response.errors)? {
        return Ok(SearchPage::default());
    }

    Ok(SearchPage {
        tweets: response.tweets.into_iter().map(Tweet::from).collect(),
        next_cursor: response.next_cursor.filter(|c| !c.is_empty()),
    })
}

/// Decode a lookup response body.
pub fn decode_lookup(body: &str) -> Result<Option<Tweet>, CrawlError> {
    let response: LookupResponse = serde_json::from_str(body)
        .context("Failed to deserialize lookup response")?;

    if check_errors(&response.errors)? {
        return Ok(None);
    }
    Ok(response.tweet.map(Tweet::from))
}

/// Returns `Ok(true)` when the body reports a missing tweet, and
/// `RateLimited` when it reports throttling.
fn check_errors(errors: &[ApiError]) -> Result<bool, CrawlError> {
    if errors.iter().any(|e| e.code == RATE_LIMIT_CODE) {
        return Err(CrawlError::RateLimited);
    }
    if errors.iter().any(|e| e.code == NOT_FOUND_CODE) {
        return Ok(true);
    }
    if let Some(e) = errors.first() {
        return Err(anyhow!("API error {}: {}", e.code, e.message).into());
    }
    Ok(false)
}

// -- Serde types for the search and lookup endpoints --

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    tweets: Vec<TweetRecord>,
    next_cursor: Option<String>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Deserialize)]
struct LookupResponse {
    tweet: Option<TweetRecord>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct TweetRecord {
    id: String,
    author: String,
    #[serde(default)]
    text: String,
    url: Option<String>,
    #[serde(default)]
    likes: i64,
    #[serde(default)]
    retweets: i64,
    #[serde(default)]
    replies: i64,
    #[serde(default)]
    views: i64,
    created_at: DateTime<Utc>,
}

impl From<TweetRecord> for Tweet {
    fn from(record: TweetRecord) -> Self {
        let url = record
            .url
            .unwrap_or_else(|| permanent_url(&record.author, &record.id));
        Tweet {
            id: record.id,
            author: record.author,
            text: record.text,
            url,
            likes: record.likes,
            retweets: record.retweets,
            replies: record.replies,
            views: record.views,
            posted_at: record.created_at,
        }
    }
}
