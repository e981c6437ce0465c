// Pipeline flow tests: crawl, refresh, promote and sweep against an
// in-memory database and a scripted platform.
//
// No network: the platform is an in-process TimelineSource that replays
// search pages and serves lookups from a map of "live" tweets. Time is
// paused so identity pacing sleeps finish instantly.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;

use trawler::db::models::TweetSnapshot;
use trawler::db::{self, Database};
use trawler::error::CrawlError;
use trawler::pipeline::crawl::{crawl_query, load_progress};
use trawler::pipeline::refresh::{refresh_next, select, RefreshOutcome, Selection};
use trawler::pipeline::scheduler::{Scheduler, SchedulerSettings};
use trawler::pipeline::{metrics, publish, sweep, Pipeline};
use trawler::ranking::{DbRatings, RankingEngine, RatingCache};
use trawler::twitter::client::{SearchPage, TimelineSource};
use trawler::twitter::rate_limit::GovernorSettings;
use trawler::twitter::search::Crawler;
use trawler::twitter::session::{Session, SessionPool};
use trawler::twitter::tweets::Tweet;

// ============================================================
// Fixtures
// ============================================================

#[derive(Default)]
struct FakePlatform {
    pages: Mutex<VecDeque<Result<SearchPage, CrawlError>>>,
    cursors: Mutex<Vec<Option<String>>>,
    live: Mutex<HashMap<String, Tweet>>,
}

impl FakePlatform {
    fn script(&self, pages: Vec<Result<SearchPage, CrawlError>>) {
        self.pages.lock().unwrap().extend(pages);
    }

    fn set_live(&self, tweet: Tweet) {
        self.live.lock().unwrap().insert(tweet.id.clone(), tweet);
    }

    fn cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().unwrap().clone()
    }
}

#[async_trait]
impl TimelineSource for FakePlatform {
    async fn search_page(
        &self,
        _session: &Session,
        _query: &str,
        cursor: Option<&str>,
    ) -> Result<SearchPage, CrawlError> {
        self.cursors.lock().unwrap().push(cursor.map(str::to_string));
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(SearchPage::default()))
    }

    async fn lookup(&self, _session: &Session, id: &str) -> Result<Option<Tweet>, CrawlError> {
        Ok(self.live.lock().unwrap().get(id).cloned())
    }
}

fn tweet(id: &str, likes: i64, age_secs: i64) -> Tweet {
    Tweet {
        id: id.to_string(),
        author: "alice".to_string(),
        text: format!("tweet {id}"),
        url: format!("https://x.com/alice/status/{id}"),
        likes,
        retweets: 0,
        replies: 0,
        views: 0,
        posted_at: Utc::now() - Duration::seconds(age_secs),
    }
}

fn snapshot(id: &str, growth_speed: f64, age_secs: i64) -> TweetSnapshot {
    let t = tweet(id, 10, age_secs);
    let captured_at = t.posted_at;
    TweetSnapshot::capture(t, captured_at, growth_speed)
}

fn page(tweets: Vec<Tweet>, next: Option<&str>) -> Result<SearchPage, CrawlError> {
    Ok(SearchPage {
        tweets,
        next_cursor: next.map(str::to_string),
    })
}

fn pipeline(platform: Arc<FakePlatform>, db: Arc<dyn Database>) -> Pipeline {
    let settings = GovernorSettings {
        window_learning: false,
        ..GovernorSettings::default()
    };
    let pool = SessionPool::from_tokens(&["token-0".to_string()], settings);
    let ratings = RatingCache::new(
        Arc::new(DbRatings::new(db.clone())),
        StdDuration::from_secs(300),
    );
    Pipeline::new(
        db,
        Arc::new(pool),
        Crawler::new(platform, 100),
        RankingEngine::new(100.0),
        Arc::new(ratings),
    )
}

// ============================================================
// Top refresh
// ============================================================

#[tokio::test(start_paused = true)]
async fn fastest_candidate_is_deleted_once_growth_stops() {
    let db = db::in_memory().unwrap();
    let platform = Arc::new(FakePlatform::default());
    let p = pipeline(platform.clone(), db.clone());
    let cancel = CancellationToken::new();

    db.save_snapshots(&[
        snapshot("a", 0.5, 1000),
        snapshot("b", 0.9, 1000),
        snapshot("c", 0.2, 1000),
    ])
    .await
    .unwrap();

    assert_eq!(db.get_fastest_growing().await.unwrap().unwrap().id, "b");

    // b stopped growing: no likes left
    platform.set_live(tweet("b", 0, 1000));
    let outcome = refresh_next(&p, Selection::Fastest, &cancel).await.unwrap();
    assert_eq!(outcome, RefreshOutcome::Dead);
    assert!(db.get_snapshot("b").await.unwrap().is_none());

    assert_eq!(db.get_fastest_growing().await.unwrap().unwrap().id, "a");
}

#[tokio::test(start_paused = true)]
async fn refresh_rescores_and_saves() {
    let db = db::in_memory().unwrap();
    let platform = Arc::new(FakePlatform::default());
    let p = pipeline(platform.clone(), db.clone());
    let cancel = CancellationToken::new();

    db.save_snapshots(&[snapshot("a", 0.5, 1000)]).await.unwrap();
    platform.set_live(tweet("a", 20, 1000));

    let outcome = refresh_next(&p, Selection::Fastest, &cancel).await.unwrap();
    let RefreshOutcome::Updated { growth_speed } = outcome else {
        panic!("expected an update, got {outcome:?}");
    };
    // 20 likes over ~1000s
    assert!((growth_speed - 0.02).abs() < 0.001);

    let stored = db.get_snapshot("a").await.unwrap().unwrap();
    assert_eq!(stored.likes, 20);
    assert!((stored.growth_speed - growth_speed).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn vanished_tweet_is_deleted() {
    let db = db::in_memory().unwrap();
    let platform = Arc::new(FakePlatform::default());
    let p = pipeline(platform, db.clone());
    let cancel = CancellationToken::new();

    db.save_snapshots(&[snapshot("gone", 0.5, 1000)]).await.unwrap();
    let outcome = refresh_next(&p, Selection::LeastRecent, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome, RefreshOutcome::Gone);
    assert_eq!(db.candidate_count().await.unwrap(), 0);

    let outcome = refresh_next(&p, Selection::LeastRecent, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome, RefreshOutcome::Idle);
}

#[tokio::test(start_paused = true)]
async fn admitted_refresh_is_promoted_once() {
    let db = db::in_memory().unwrap();
    let platform = Arc::new(FakePlatform::default());
    let p = pipeline(platform.clone(), db.clone());
    let cancel = CancellationToken::new();

    db.save_snapshots(&[snapshot("hit", 0.5, 1000)]).await.unwrap();
    platform.set_live(tweet("hit", 5000, 1000));

    let outcome = refresh_next(&p, Selection::Fastest, &cancel).await.unwrap();
    assert_eq!(outcome, RefreshOutcome::Promoted);
    assert_eq!(db.edit_queue_len().await.unwrap(), 1);
    assert!(db.get_snapshot("hit").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn held_candidate_is_skipped_by_second_refresher() {
    let db = db::in_memory().unwrap();
    let platform = Arc::new(FakePlatform::default());
    let p = pipeline(platform, db.clone());

    let candidate = snapshot("x", 0.5, 1000);
    let _claim = p.refresh_gate.try_claim("x").unwrap();
    let outcome = trawler::pipeline::refresh::refresh_candidate(
        &p,
        &candidate,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(outcome, RefreshOutcome::Busy);
}

// ============================================================
// Oldest-reachable selection
// ============================================================

#[tokio::test]
async fn oldest_reachable_selection_and_fallback() {
    let db = db::in_memory().unwrap();
    let p = pipeline(Arc::new(FakePlatform::default()), db.clone());

    assert!(select(&p, Selection::OldestReachable).await.unwrap().is_none());

    // Predicted ratings ~50, ~80 at threshold 100: fallback to the best
    db.save_snapshots(&[snapshot("fifty", 0.05, 1000), snapshot("eighty", 0.08, 1000)])
        .await
        .unwrap();
    let picked = select(&p, Selection::OldestReachable).await.unwrap().unwrap();
    assert_eq!(picked.id, "eighty");

    // ~120 reaches the threshold and wins
    db.save_snapshots(&[snapshot("one-twenty", 0.12, 1000)])
        .await
        .unwrap();
    let picked = select(&p, Selection::OldestReachable).await.unwrap().unwrap();
    assert_eq!(picked.id, "one-twenty");
}

// ============================================================
// Crawl
// ============================================================

#[tokio::test(start_paused = true)]
async fn crawl_saves_pages_and_promotes_admitted() {
    let db = db::in_memory().unwrap();
    let platform = Arc::new(FakePlatform::default());
    let p = pipeline(platform.clone(), db.clone());
    let cancel = CancellationToken::new();

    platform.script(vec![
        page(
            vec![tweet("1", 500, 600), tweet("2", 5, 600), tweet("3", 0, 600)],
            Some("c1"),
        ),
        page(vec![tweet("4", 3, 900)], None),
    ]);

    let report = crawl_query(&p, "rust", Duration::hours(1), &cancel)
        .await
        .unwrap();

    assert_eq!(report.pages, 2);
    assert_eq!(report.seen, 4);
    assert_eq!(report.promoted, 1);
    assert!(report.complete);

    // "1" was promoted, "3" never tracked (zero growth)
    assert_eq!(db.candidate_count().await.unwrap(), 2);
    assert!(db.get_snapshot("2").await.unwrap().is_some());
    assert!(db.get_snapshot("4").await.unwrap().is_some());
    assert_eq!(db.edit_queue_len().await.unwrap(), 1);

    let progress = load_progress(db.as_ref(), "rust").await.unwrap().unwrap();
    assert!(progress.identity.is_none());
    assert!(progress.cursor.is_none());
}

#[tokio::test(start_paused = true)]
async fn crawl_resumes_from_cursor_after_failure() {
    let db = db::in_memory().unwrap();
    let platform = Arc::new(FakePlatform::default());
    let p = pipeline(platform.clone(), db.clone());
    let cancel = CancellationToken::new();

    platform.script(vec![
        page(vec![tweet("1", 5, 600)], Some("c1")),
        Err(CrawlError::Transport(anyhow::anyhow!("connection reset"))),
    ]);
    assert!(crawl_query(&p, "rust", Duration::hours(1), &cancel)
        .await
        .is_err());

    let progress = load_progress(db.as_ref(), "rust").await.unwrap().unwrap();
    assert_eq!(progress.cursor.as_deref(), Some("c1"));
    assert_eq!(progress.identity.as_deref(), Some("session-0"));

    platform.script(vec![page(vec![tweet("2", 5, 700)], None)]);
    let report = crawl_query(&p, "rust", Duration::hours(1), &cancel)
        .await
        .unwrap();
    assert!(report.complete);

    assert_eq!(
        platform.cursors(),
        vec![None, Some("c1".to_string()), Some("c1".to_string())]
    );
    assert_eq!(db.candidate_count().await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn throttled_crawl_keeps_partial_page_and_cursor() {
    let db = db::in_memory().unwrap();
    let platform = Arc::new(FakePlatform::default());
    let p = pipeline(platform.clone(), db.clone());
    let cancel = CancellationToken::new();

    platform.script(vec![
        page(vec![tweet("1", 5, 600)], Some("c1")),
        Err(CrawlError::RateLimited),
    ]);
    let report = crawl_query(&p, "rust", Duration::hours(1), &cancel)
        .await
        .unwrap();

    assert!(report.throttled);
    assert!(!report.complete);
    assert_eq!(db.candidate_count().await.unwrap(), 1);

    let progress = load_progress(db.as_ref(), "rust").await.unwrap().unwrap();
    assert_eq!(progress.cursor.as_deref(), Some("c1"));
    assert!(p.pool.sessions()[0].governor().current_delay() > 1);
}

#[tokio::test(start_paused = true)]
async fn same_url_across_crawls_is_enqueued_once() {
    let db = db::in_memory().unwrap();
    let platform = Arc::new(FakePlatform::default());
    let p = pipeline(platform.clone(), db.clone());
    let cancel = CancellationToken::new();

    // Young enough to fall inside the second window as well
    platform.script(vec![page(vec![tweet("1", 500, 20)], None)]);
    let first = crawl_query(&p, "rust", Duration::hours(1), &cancel)
        .await
        .unwrap();
    platform.script(vec![page(vec![tweet("1", 900, 30)], None)]);
    let second = crawl_query(&p, "rust", Duration::hours(1), &cancel)
        .await
        .unwrap();

    assert_eq!(first.promoted, 1);
    assert_eq!(second.seen, 1);
    assert_eq!(second.promoted, 0);
    assert_eq!(db.edit_queue_len().await.unwrap(), 1);
    assert_eq!(db.published_count().await.unwrap(), 1);
    assert_eq!(db.candidate_count().await.unwrap(), 0);
}

#[tokio::test]
async fn crawl_returns_cancelled_when_no_identity_frees_up() {
    let db = db::in_memory().unwrap();
    let p = pipeline(Arc::new(FakePlatform::default()), db);
    let cancel = CancellationToken::new();

    let _held = p.pool.acquire(&cancel).await.unwrap();
    cancel.cancel();
    let err = crawl_query(&p, "rust", Duration::hours(1), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CrawlError>(),
        Some(CrawlError::Cancelled)
    ));
}

// ============================================================
// Publish gate and sweep
// ============================================================

#[tokio::test]
async fn publishing_same_url_twice_enqueues_once() {
    let db = db::in_memory().unwrap();
    let s = snapshot("dup", 2.0, 60);

    assert!(publish::promote(db.as_ref(), &s).await.unwrap());
    assert!(!publish::promote(db.as_ref(), &s).await.unwrap());
    assert_eq!(db.edit_queue_len().await.unwrap(), 1);
}

#[tokio::test]
async fn sweep_removes_only_candidates_past_max_age() {
    let db = db::in_memory().unwrap();
    db.save_snapshots(&[
        snapshot("23h", 0.1, 23 * 3600),
        snapshot("25h", 0.1, 25 * 3600),
        snapshot("1h", 0.1, 3600),
    ])
    .await
    .unwrap();

    let deleted = sweep::run(db.as_ref(), Duration::hours(24), Utc::now())
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(db.get_snapshot("25h").await.unwrap().is_none());
    assert_eq!(db.candidate_count().await.unwrap(), 2);
}

// ============================================================
// Scheduler and metrics
// ============================================================

#[tokio::test(start_paused = true)]
async fn scheduler_runs_until_cancelled() {
    let db = db::in_memory().unwrap();
    let platform = Arc::new(FakePlatform::default());
    let p = pipeline(platform.clone(), db.clone());
    platform.script(vec![page(vec![tweet("1", 5, 600)], None)]);

    let cancel = CancellationToken::new();
    let settings = SchedulerSettings {
        queries: vec!["rust".to_string(), "tokio".to_string()],
        ..SchedulerSettings::default()
    };
    let handle = tokio::spawn(Scheduler::new(p, settings, cancel.clone()).run());

    tokio::time::sleep(StdDuration::from_secs(30)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    // Both queries crawled at least once
    assert!(platform.cursors().len() >= 2);
    assert!(load_progress(db.as_ref(), "rust").await.unwrap().is_some());
    assert!(load_progress(db.as_ref(), "tokio").await.unwrap().is_some());
}

#[tokio::test]
async fn metrics_reflect_storage_and_sessions() {
    let db = db::in_memory().unwrap();
    let p = pipeline(Arc::new(FakePlatform::default()), db.clone());
    db.save_snapshots(&[snapshot("a", 0.5, 100)]).await.unwrap();
    publish::promote(db.as_ref(), &snapshot("b", 5.0, 100))
        .await
        .unwrap();

    let m = metrics::collect(&p).await.unwrap();
    assert_eq!(m.candidates, 1);
    assert_eq!(m.published, 1);
    assert_eq!(m.edit_queue, 1);
    assert_eq!(m.idle_sessions, 1);
    assert_eq!(m.sessions.len(), 1);
    assert_eq!(m.sessions[0].delay_secs, 1);
}
