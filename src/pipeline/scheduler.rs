// Top-level orchestrator: one crawl task per query plus the maintenance
// tasks, all running in parallel until the root token is cancelled.
//
// Every task is the same loop: wait for the next tick, run one iteration
// under a timeout, log whatever went wrong, repeat. No iteration failure
// ends a task. Cancellation interrupts both the wait and the iteration in
// flight; anything the iteration already committed stays committed.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::refresh::{self, Selection};
use super::{crawl, metrics, sweep, Pipeline};
use crate::error::CrawlError;

/// Periods and limits for every scheduled task.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub queries: Vec<String>,
    pub crawl_interval: Duration,
    /// How far back the first window of a query reaches.
    pub lookback: chrono::Duration,
    pub max_age: chrono::Duration,
    pub task_timeout: Duration,
    pub top_refresh_interval: Duration,
    pub oldest_fast_interval: Duration,
    pub oldest_general_interval: Duration,
    pub sweep_interval: Duration,
    pub metrics_interval: Duration,
    pub governor_tick_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            queries: Vec::new(),
            crawl_interval: Duration::from_secs(60),
            lookback: chrono::Duration::hours(1),
            max_age: chrono::Duration::hours(sweep::DEFAULT_MAX_AGE_HOURS),
            task_timeout: Duration::from_secs(5 * 60),
            top_refresh_interval: Duration::from_secs(60),
            oldest_fast_interval: Duration::from_secs(5),
            oldest_general_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60 * 60),
            metrics_interval: Duration::from_secs(60),
            governor_tick_interval: Duration::from_secs(10),
        }
    }
}

pub struct Scheduler {
    pipeline: Pipeline,
    settings: SchedulerSettings,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(pipeline: Pipeline, settings: SchedulerSettings, cancel: CancellationToken) -> Self {
        Self {
            pipeline,
            settings,
            cancel,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Spawn every task onto a JoinSet and return it.
    pub fn spawn(&self) -> JoinSet<()> {
        let mut tasks = JoinSet::new();

        for query in &self.settings.queries {
            let pipeline = self.pipeline.clone();
            let cancel = self.cancel.clone();
            let query = query.clone();
            let lookback = self.settings.lookback;
            self.spawn_periodic(
                &mut tasks,
                format!("crawl:{query}"),
                self.settings.crawl_interval,
                move || {
                    let pipeline = pipeline.clone();
                    let cancel = cancel.clone();
                    let query = query.clone();
                    async move {
                        crawl::crawl_query(&pipeline, &query, lookback, &cancel).await?;
                        Ok(())
                    }
                },
            );
        }

        for (selection, period) in [
            (Selection::Fastest, self.settings.top_refresh_interval),
            (Selection::OldestReachable, self.settings.oldest_fast_interval),
            (Selection::LeastRecent, self.settings.oldest_general_interval),
        ] {
            let pipeline = self.pipeline.clone();
            let cancel = self.cancel.clone();
            self.spawn_periodic(
                &mut tasks,
                format!("refresh:{}", selection.as_str()),
                period,
                move || {
                    let pipeline = pipeline.clone();
                    let cancel = cancel.clone();
                    async move {
                        refresh::refresh_next(&pipeline, selection, &cancel).await?;
                        Ok(())
                    }
                },
            );
        }

        {
            let db = self.pipeline.db.clone();
            let max_age = self.settings.max_age;
            self.spawn_periodic(
                &mut tasks,
                "sweep".to_string(),
                self.settings.sweep_interval,
                move || {
                    let db = db.clone();
                    async move {
                        sweep::run(db.as_ref(), max_age, Utc::now()).await?;
                        Ok(())
                    }
                },
            );
        }

        {
            let pipeline = self.pipeline.clone();
            self.spawn_periodic(
                &mut tasks,
                "metrics".to_string(),
                self.settings.metrics_interval,
                move || {
                    let pipeline = pipeline.clone();
                    async move {
                        metrics::report(&pipeline).await?;
                        Ok(())
                    }
                },
            );
        }

        {
            let pool = self.pipeline.pool.clone();
            self.spawn_periodic(
                &mut tasks,
                "governor-tick".to_string(),
                self.settings.governor_tick_interval,
                move || {
                    for session in pool.sessions() {
                        session.governor().tick();
                    }
                    async { Ok(()) }
                },
            );
        }

        info!(
            queries = self.settings.queries.len(),
            tasks = tasks.len(),
            sessions = self.pipeline.pool.len(),
            "Scheduler started"
        );
        tasks
    }

    /// Run every task until the root token is cancelled, then wait for all
    /// of them to wind down.
    pub async fn run(self) -> Result<()> {
        let mut tasks = self.spawn();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Scheduled task panicked");
            }
        }
        info!("Scheduler stopped");
        Ok(())
    }

    fn spawn_periodic<F, Fut>(
        &self,
        tasks: &mut JoinSet<()>,
        name: String,
        period: Duration,
        job: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        tasks.spawn(run_periodic(
            name,
            period,
            self.settings.task_timeout,
            self.cancel.clone(),
            job,
        ));
    }
}

/// The loop every scheduled task runs.
pub async fn run_periodic<F, Fut>(
    name: String,
    period: Duration,
    timeout: Duration,
    cancel: CancellationToken,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = tokio::time::timeout(timeout, job()) => result,
        };

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) if is_cancelled(&e) => break,
            Ok(Err(e)) => warn!(task = %name, error = %e, "Task iteration failed"),
            Err(_) => warn!(
                task = %name,
                timeout_secs = timeout.as_secs(),
                "Task iteration timed out"
            ),
        }
    }

    debug!(task = %name, "Task stopped");
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<CrawlError>(), Some(CrawlError::Cancelled))
}
