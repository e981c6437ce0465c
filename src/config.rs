use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::pipeline::scheduler::SchedulerSettings;
use crate::twitter::client::{DEFAULT_API_URL, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::twitter::rate_limit::GovernorSettings;
use crate::twitter::search::DEFAULT_BATCH_SIZE;

/// Longest staleness cutoff accepted, one year.
const MAX_AGE_HOURS_LIMIT: i64 = 24 * 365;

/// Furthest a first crawl window may reach back, 30 days.
const MAX_LOOKBACK_SECS: u64 = 30 * 24 * 60 * 60;

/// Central configuration loaded from environment variables.
///
/// All secrets come from env vars (never hardcoded). The .env file
/// is loaded automatically at startup via dotenvy.
pub struct Config {
    pub db_path: String,
    /// Base URL of the search/lookup API (defaults to https://api.x.com/2).
    pub api_url: String,
    /// One bearer token per crawl identity.
    pub session_tokens: Vec<String>,
    /// Topic queries, one crawl task each.
    pub queries: Vec<String>,
    /// Score a candidate must beat to be handed downstream.
    pub admission_threshold: f64,
    pub crawl_interval_secs: u64,
    /// How far back a query's first crawl window reaches.
    pub lookback_secs: u64,
    pub max_age_hours: i64,
    pub task_timeout_secs: u64,
    pub initial_delay_secs: u64,
    /// Use the window-threshold-learning pacing policy on top of backoff.
    pub window_learning: bool,
    /// Items per batch report to the governor.
    pub batch_size: usize,
    /// Results requested per search page from the API.
    pub page_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Everything has a default except the session tokens and queries,
    /// which are only needed by commands that crawl.
    pub fn load() -> Result<Self> {
        let config = Self {
            db_path: env::var("TRAWLER_DB_PATH").unwrap_or_else(|_| "./trawler.db".to_string()),
            api_url: env::var("TRAWLER_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            session_tokens: split_list(&env::var("TRAWLER_SESSIONS").unwrap_or_default(), ','),
            queries: split_list(&env::var("TRAWLER_QUERIES").unwrap_or_default(), ';'),
            admission_threshold: env_or("TRAWLER_ADMISSION_THRESHOLD", 100.0)?,
            crawl_interval_secs: env_or("TRAWLER_CRAWL_INTERVAL_SECS", 60)?,
            lookback_secs: env_or("TRAWLER_LOOKBACK_SECS", 60 * 60)?,
            max_age_hours: env_or("TRAWLER_MAX_AGE_HOURS", 24)?,
            task_timeout_secs: env_or("TRAWLER_TASK_TIMEOUT_SECS", 5 * 60)?,
            initial_delay_secs: env_or("TRAWLER_INITIAL_DELAY_SECS", 1)?,
            window_learning: env_or("TRAWLER_WINDOW_LEARNING", true)?,
            batch_size: env_or("TRAWLER_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            page_size: env_or("TRAWLER_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but make no sense at runtime.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_AGE_HOURS_LIMIT).contains(&self.max_age_hours) {
            bail!(
                "TRAWLER_MAX_AGE_HOURS must be between 1 and {MAX_AGE_HOURS_LIMIT}, got {}",
                self.max_age_hours
            );
        }
        if self.lookback_secs == 0 || self.lookback_secs > MAX_LOOKBACK_SECS {
            bail!(
                "TRAWLER_LOOKBACK_SECS must be between 1 and {MAX_LOOKBACK_SECS}, got {}",
                self.lookback_secs
            );
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            bail!(
                "TRAWLER_PAGE_SIZE must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            );
        }
        if self.batch_size == 0 {
            bail!("TRAWLER_BATCH_SIZE must be at least 1");
        }
        if !self.admission_threshold.is_finite() {
            bail!("TRAWLER_ADMISSION_THRESHOLD must be a finite number");
        }
        Ok(())
    }

    /// Staleness cutoff for the sweep.
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.max_age_hours.clamp(1, MAX_AGE_HOURS_LIMIT))
    }

    /// Check that at least one crawl identity is configured.
    /// Call this before any operation that talks to the platform.
    pub fn require_sessions(&self) -> Result<()> {
        if self.session_tokens.is_empty() {
            anyhow::bail!(
                "TRAWLER_SESSIONS not set. Add a comma-separated list of bearer tokens\n\
                 to your .env file, one per crawl identity."
            );
        }
        Ok(())
    }

    /// Check that there is something to crawl.
    pub fn require_queries(&self) -> Result<()> {
        if self.queries.is_empty() {
            anyhow::bail!(
                "TRAWLER_QUERIES not set. Add a ';'-separated list of topic queries\n\
                 to your .env file."
            );
        }
        Ok(())
    }

    pub fn governor_settings(&self) -> GovernorSettings {
        GovernorSettings {
            initial_delay_secs: self.initial_delay_secs,
            window_learning: self.window_learning,
            ..GovernorSettings::default()
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            queries: self.queries.clone(),
            crawl_interval: Duration::from_secs(self.crawl_interval_secs.max(1)),
            lookback: chrono::Duration::seconds(self.lookback_secs.min(MAX_LOOKBACK_SECS) as i64),
            max_age: self.max_age(),
            task_timeout: Duration::from_secs(self.task_timeout_secs.max(1)),
            ..SchedulerSettings::default()
        }
    }
}

/// Parse an optional env var, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        _ => Ok(default),
    }
}

fn split_list(raw: &str, sep: char) -> Vec<String> {
    raw.split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
