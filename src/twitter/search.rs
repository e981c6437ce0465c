// Paginated search and lookup on a checked-out identity.
//
// The crawler owns the pacing contract: it sleeps for the identity's
// current delay before every request, counts the request against the
// governor's windows, reports every `batch_size` items and every finished
// query back to the governor, and turns throttling into backoff plus a
// successful (partial) outcome. Anything else fails the current call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::TimelineSource;
use super::session::Session;
use super::tweets::Tweet;
use crate::error::CrawlError;

/// Default number of items between `processed_batch` reports.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// A topic query with optional time bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub topic: String,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl SearchQuery {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            since: None,
            until: None,
        }
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// The query string sent to the platform: topic, time bounds, and a
    /// retweet exclusion.
    pub fn to_query_string(&self) -> String {
        let mut q = self.topic.trim().to_string();
        if let Some(since) = self.since {
            q.push_str(&format!(" since_time:{}", since.timestamp()));
        }
        if let Some(until) = self.until {
            q.push_str(&format!(" until_time:{}", until.timestamp()));
        }
        q.push_str(" -filter:retweets");
        q
    }
}

/// One page of a search as seen by the caller.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Items at or after the query's lower bound, newest first.
    pub tweets: Vec<Tweet>,
    /// Cursor to resume from after this page (`None` when exhausted).
    pub cursor: Option<String>,
    /// The platform throttled the identity; no more pages follow.
    pub throttled: bool,
    /// No more pages follow.
    pub last: bool,
}

/// Everything a search collected.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub tweets: Vec<Tweet>,
    /// True when throttling cut the search short. The tweets are still valid.
    pub throttled: bool,
    /// Where to resume when the search was cut short.
    pub cursor: Option<String>,
}

/// Executes searches and lookups through a `TimelineSource`.
#[derive(Clone)]
pub struct Crawler {
    source: Arc<dyn TimelineSource>,
    batch_size: usize,
}

impl Crawler {
    pub fn new(source: Arc<dyn TimelineSource>, batch_size: usize) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
        }
    }

    /// Start a lazy, page-at-a-time search, optionally resuming from `cursor`.
    pub fn pages<'a>(
        &'a self,
        session: &'a Session,
        query: SearchQuery,
        cursor: Option<String>,
        cancel: &CancellationToken,
    ) -> Pager<'a> {
        Pager {
            source: self.source.as_ref(),
            session,
            query_string: query.to_query_string(),
            query,
            cursor,
            cancel: cancel.clone(),
            batch_size: self.batch_size,
            since_last_batch: 0,
            done: false,
        }
    }

    /// Run a search to completion (or throttling) and collect every item.
    pub async fn search(
        &self,
        session: &Session,
        query: SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome, CrawlError> {
        let mut pager = self.pages(session, query, None, cancel);
        let mut outcome = SearchOutcome::default();

        while let Some(page) = pager.next_page().await? {
            outcome.tweets.extend(page.tweets);
            if page.throttled {
                outcome.throttled = true;
                outcome.cursor = page.cursor;
            }
        }

        Ok(outcome)
    }

    /// Fetch the live state of one tweet. `Ok(None)` means it is gone.
    ///
    /// Throttling backs off the identity's governor and is returned as
    /// `RateLimited` so the caller can skip this tick.
    pub async fn fetch_by_id(
        &self,
        session: &Session,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Tweet>, CrawlError> {
        wait_for_pace(session, cancel).await?;
        session.governor().record_request();

        match self.source.lookup(session, id).await {
            Err(CrawlError::RateLimited) => {
                session.governor().too_many_requests();
                warn!(identity = session.label(), id = id, "Lookup throttled");
                Err(CrawlError::RateLimited)
            }
            other => other,
        }
    }
}

/// Page-at-a-time search state. Obtained from `Crawler::pages`.
pub struct Pager<'a> {
    source: &'a dyn TimelineSource,
    session: &'a Session,
    query: SearchQuery,
    query_string: String,
    cursor: Option<String>,
    cancel: CancellationToken,
    batch_size: usize,
    since_last_batch: usize,
    done: bool,
}

impl<'a> Pager<'a> {
    /// Fetch the next page, or `None` once the search is over.
    pub async fn next_page(&mut self) -> Result<Option<Page>, CrawlError> {
        if self.done {
            return Ok(None);
        }

        let session: &'a Session = self.session;
        let governor = session.governor();

        wait_for_pace(session, &self.cancel).await?;
        governor.record_request();

        let raw = match self
            .source
            .search_page(session, &self.query_string, self.cursor.as_deref())
            .await
        {
            Ok(raw) => raw,
            Err(CrawlError::RateLimited) => {
                governor.too_many_requests();
                self.done = true;
                warn!(
                    identity = session.label(),
                    query = %self.query.topic,
                    "Search throttled, keeping partial results"
                );
                return Ok(Some(Page {
                    tweets: Vec::new(),
                    cursor: self.cursor.clone(),
                    throttled: true,
                    last: true,
                }));
            }
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };

        let fetched = raw.tweets.len();
        let mut tweets = raw.tweets;
        let mut reached_bound = false;
        if let Some(since) = self.query.since {
            if let Some(pos) = tweets.iter().position(|t| t.posted_at < since) {
                tweets.truncate(pos);
                reached_bound = true;
            }
        }

        self.since_last_batch += tweets.len();
        while self.since_last_batch >= self.batch_size {
            governor.processed_batch();
            self.since_last_batch -= self.batch_size;
        }

        let exhausted = reached_bound || fetched == 0 || raw.next_cursor.is_none();
        if exhausted {
            governor.processed_query();
            self.done = true;
            self.cursor = None;
            info!(
                identity = session.label(),
                query = %self.query.topic,
                delay_secs = governor.current_delay(),
                "Search complete"
            );
        } else {
            self.cursor = raw.next_cursor;
        }

        debug!(
            fetched = fetched,
            kept = tweets.len(),
            "Fetched search page for {}",
            self.query.topic
        );

        Ok(Some(Page {
            tweets,
            cursor: self.cursor.clone(),
            throttled: false,
            last: exhausted,
        }))
    }

    /// The cursor the next page would be fetched from.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Turn the pager into a lazy stream of pages.
    pub fn into_stream(self) -> impl Stream<Item = Result<Page, CrawlError>> + 'a {
        stream::unfold(Some(self), |state| async move {
            let mut pager = state?;
            match pager.next_page().await {
                Ok(Some(page)) => Some((Ok(page), Some(pager))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

/// Sleep for the identity's current delay, or bail out on cancellation.
async fn wait_for_pace(session: &Session, cancel: &CancellationToken) -> Result<(), CrawlError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CrawlError::Cancelled),
        _ = tokio::time::sleep(session.pace()) => Ok(()),
    }
}
