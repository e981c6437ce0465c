// One crawl pass for one topic query.
//
// Each pass covers a time window ending a minute ago and starting where the
// previous completed window ended (or the lookback, the first time). Pages
// come newest first; every page is scored, saved in a single storage write,
// and its admitted tweets go through the publish gate. Progress is written
// to scan state after every page, so a pass that fails halfway resumes from
// the same cursor next tick, provided it gets the same identity back.
// Cursors are only valid for the identity that produced them; any other
// identity restarts the window from its first page.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::publish;
use super::Pipeline;
use crate::db::models::{CrawlProgress, TweetSnapshot};
use crate::db::Database;
use crate::twitter::search::SearchQuery;
use crate::twitter::tweets::Tweet;

/// The newest minute is left alone; counters on brand-new tweets are noise.
pub const RECENT_MARGIN_SECS: i64 = 60;

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub pages: usize,
    pub seen: usize,
    /// Candidates written to the working set.
    pub tracked: usize,
    /// Admitted and newly handed downstream.
    pub promoted: usize,
    /// Tweets whose scoring failed and were left out.
    pub skipped: usize,
    pub throttled: bool,
    /// The whole window was covered.
    pub complete: bool,
}

/// Scan state key holding a query's crawl progress.
pub fn progress_key(topic: &str) -> String {
    format!("crawl:{}", topic.trim())
}

pub async fn load_progress(db: &dyn Database, topic: &str) -> Result<Option<CrawlProgress>> {
    let Some(raw) = db.get_scan_state(&progress_key(topic)).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(progress) => Ok(Some(progress)),
        Err(e) => {
            warn!(query = topic, error = %e, "Discarding unreadable crawl progress");
            Ok(None)
        }
    }
}

async fn save_progress(db: &dyn Database, topic: &str, progress: &CrawlProgress) -> Result<()> {
    let json = serde_json::to_string(progress)?;
    db.set_scan_state(&progress_key(topic), &json)
        .await
        .context("Failed to save crawl progress")
}

/// Work out the window (and cursor) for the next pass.
///
/// An unfinished window is resumed; a finished one hands its upper bound
/// over as the next lower bound. The lower bound never reaches further back
/// than `lookback`.
pub fn plan_window(
    previous: Option<CrawlProgress>,
    identity: &str,
    now: DateTime<Utc>,
    lookback: Duration,
) -> CrawlProgress {
    let floor = now - lookback;
    let until = now - Duration::seconds(RECENT_MARGIN_SECS);

    match previous {
        // Unfinished: same window, cursor only if it is ours
        Some(p) if p.identity.is_some() && p.until > floor => {
            let cursor = if p.identity.as_deref() == Some(identity) {
                p.cursor
            } else {
                None
            };
            CrawlProgress {
                since: p.since.max(floor),
                until: p.until,
                cursor,
                identity: Some(identity.to_string()),
            }
        }
        Some(p) => CrawlProgress {
            since: p.until.max(floor).min(until),
            until,
            cursor: None,
            identity: Some(identity.to_string()),
        },
        None => CrawlProgress {
            since: floor.min(until),
            until,
            cursor: None,
            identity: Some(identity.to_string()),
        },
    }
}

/// Run one crawl pass for `topic`.
pub async fn crawl_query(
    pipeline: &Pipeline,
    topic: &str,
    lookback: Duration,
    cancel: &CancellationToken,
) -> Result<CrawlReport> {
    let db = pipeline.db.as_ref();
    let session = pipeline.pool.acquire(cancel).await?;

    let previous = load_progress(db, topic).await?;
    let mut progress = plan_window(previous, session.label(), Utc::now(), lookback);
    save_progress(db, topic, &progress).await?;

    debug!(
        query = topic,
        identity = session.label(),
        since = %progress.since,
        until = %progress.until,
        resuming = progress.cursor.is_some(),
        "Starting crawl pass"
    );

    let query = SearchQuery::new(topic)
        .since(progress.since)
        .until(progress.until);
    let mut pager = pipeline
        .crawler
        .pages(&session, query, progress.cursor.clone(), cancel);
    let mut report = CrawlReport::default();

    while let Some(page) = pager.next_page().await? {
        report.pages += 1;
        report.seen += page.tweets.len();

        let (tracked, promoted, skipped) = store_page(pipeline, page.tweets).await?;
        report.tracked += tracked;
        report.promoted += promoted;
        report.skipped += skipped;

        if page.throttled {
            report.throttled = true;
        } else if page.last {
            report.complete = true;
        }

        if report.complete {
            // Window done: keep only the watermark
            progress.cursor = None;
            progress.identity = None;
        } else {
            progress.cursor = page.cursor;
        }
        save_progress(db, topic, &progress).await?;
    }

    info!(
        query = topic,
        pages = report.pages,
        seen = report.seen,
        tracked = report.tracked,
        promoted = report.promoted,
        throttled = report.throttled,
        "Crawl pass finished"
    );
    Ok(report)
}

/// Score a page, save it in one write, then promote what was admitted.
/// Returns (tracked, promoted, skipped).
async fn store_page(pipeline: &Pipeline, tweets: Vec<Tweet>) -> Result<(usize, usize, usize)> {
    let captured_at = Utc::now();
    let mut snapshots: Vec<TweetSnapshot> = Vec::with_capacity(tweets.len());
    let mut admitted: Vec<usize> = Vec::new();
    let mut skipped = 0;

    for tweet in tweets {
        let id = tweet.id.clone();
        match pipeline
            .ranking
            .capture(tweet, pipeline.ratings.as_ref(), captured_at)
            .await
        {
            Ok((_, assessment)) if assessment.is_dead() => {}
            Ok((snapshot, assessment)) => {
                if assessment.admit {
                    admitted.push(snapshots.len());
                }
                snapshots.push(snapshot);
            }
            Err(e) => {
                skipped += 1;
                warn!(id = %id, error = %e, "Failed to score tweet, skipping");
            }
        }
    }

    if snapshots.is_empty() {
        return Ok((0, 0, skipped));
    }

    let db = pipeline.db.as_ref();
    let tracked = db
        .save_snapshots(&snapshots)
        .await
        .context("Failed to save crawled page")?;

    let mut promoted = 0;
    for idx in admitted {
        if publish::promote(db, &snapshots[idx]).await? {
            promoted += 1;
        }
    }

    Ok((tracked, promoted, skipped))
}
