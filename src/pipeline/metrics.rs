// Periodic health snapshot: working set, publish counts, identity pacing.
//
// There is no metrics backend; the numbers go to the log at info level so
// they show up next to the crawl output.

use anyhow::Result;
use tracing::info;

use super::Pipeline;

/// One identity's pacing state.
#[derive(Debug, Clone)]
pub struct SessionMetrics {
    pub label: String,
    pub delay_secs: u64,
    pub minimal_delay_secs: u64,
    /// (window seconds, requests in window, learned threshold)
    pub windows: Vec<(u64, u64, Option<u64>)>,
}

#[derive(Debug, Clone)]
pub struct Metrics {
    pub candidates: i64,
    pub published: i64,
    pub edit_queue: i64,
    pub idle_sessions: usize,
    pub refreshing: usize,
    pub cached_ratings: usize,
    pub sessions: Vec<SessionMetrics>,
}

pub async fn collect(pipeline: &Pipeline) -> Result<Metrics> {
    let db = pipeline.db.as_ref();

    let sessions = pipeline
        .pool
        .sessions()
        .iter()
        .map(|s| {
            let governor = s.governor();
            SessionMetrics {
                label: s.label().to_string(),
                delay_secs: governor.current_delay(),
                minimal_delay_secs: governor.minimal_delay(),
                windows: governor
                    .windows()
                    .into_iter()
                    .map(|w| (w.duration.as_secs(), w.count, w.threshold))
                    .collect(),
            }
        })
        .collect();

    Ok(Metrics {
        candidates: db.candidate_count().await?,
        published: db.published_count().await?,
        edit_queue: db.edit_queue_len().await?,
        idle_sessions: pipeline.pool.available(),
        refreshing: pipeline.refresh_gate.in_flight(),
        cached_ratings: pipeline.ratings.len(),
        sessions,
    })
}

/// Collect and log one snapshot.
pub async fn report(pipeline: &Pipeline) -> Result<Metrics> {
    let metrics = collect(pipeline).await?;

    info!(
        candidates = metrics.candidates,
        published = metrics.published,
        edit_queue = metrics.edit_queue,
        idle_sessions = metrics.idle_sessions,
        refreshing = metrics.refreshing,
        cached_ratings = metrics.cached_ratings,
        "Pipeline metrics"
    );
    for s in &metrics.sessions {
        info!(
            identity = %s.label,
            delay_secs = s.delay_secs,
            minimal_delay_secs = s.minimal_delay_secs,
            windows = ?s.windows,
            "Identity pacing"
        );
    }

    // The metrics tick doubles as the rating cache's purge
    pipeline.ratings.purge_expired();

    Ok(metrics)
}
