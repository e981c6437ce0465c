// Re-check tracked candidates against their live state.
//
// Three maintenance tasks share this routine and differ only in how they
// pick the candidate: the fastest grower, the oldest one still predicted to
// clear the admission threshold, or the one checked least recently. The
// refreshed tweet is re-scored from scratch; a gone tweet or one whose
// growth speed is no longer positive is deleted, an admitted one is
// promoted, anything else is saved back with its new growth speed.
//
// Two tasks can pick the same candidate. `RefreshGate` lets only one of
// them refresh it; the other reports `Busy` and tries again next tick.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::publish;
use super::Pipeline;
use crate::db::models::TweetSnapshot;
use crate::error::CrawlError;

/// How a refresh task chooses its candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Highest growth speed.
    Fastest,
    /// Oldest candidate predicted to still meet the threshold, else the
    /// best predicted one.
    OldestReachable,
    /// Least recently captured.
    LeastRecent,
}

impl Selection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Selection::Fastest => "top",
            Selection::OldestReachable => "oldest-reachable",
            Selection::LeastRecent => "oldest",
        }
    }
}

/// What one refresh did.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Nothing is tracked.
    Idle,
    /// Another task is refreshing this candidate right now.
    Busy,
    /// The identity was throttled; the candidate is untouched.
    Throttled,
    /// The tweet no longer exists and was deleted.
    Gone,
    /// Growth speed resolved to zero or below and the candidate was deleted.
    Dead,
    /// Admitted and handed to the publish gate.
    Promoted,
    /// Re-scored and saved.
    Updated { growth_speed: f64 },
}

/// Per-candidate single-flight guard.
#[derive(Default)]
pub struct RefreshGate {
    in_flight: Mutex<HashSet<String>>,
}

impl RefreshGate {
    /// Claim `id` for refreshing. `None` if someone else holds it.
    pub fn try_claim(&self, id: &str) -> Option<RefreshClaim<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(id.to_string()) {
            return None;
        }
        Some(RefreshClaim {
            gate: self,
            id: id.to_string(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Held while a candidate is being refreshed; released on drop.
pub struct RefreshClaim<'a> {
    gate: &'a RefreshGate,
    id: String,
}

impl Drop for RefreshClaim<'_> {
    fn drop(&mut self) {
        self.gate
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Pick a candidate according to `selection`.
pub async fn select(pipeline: &Pipeline, selection: Selection) -> Result<Option<TweetSnapshot>> {
    let db = &pipeline.db;
    let candidate = match selection {
        Selection::Fastest => db.get_fastest_growing().await,
        Selection::OldestReachable => {
            db.get_oldest_above_threshold(pipeline.ranking.current_top(), Utc::now())
                .await
        }
        Selection::LeastRecent => db.get_oldest_any().await,
    };
    candidate.with_context(|| format!("Failed to select {} candidate", selection.as_str()))
}

/// Select one candidate and refresh it.
pub async fn refresh_next(
    pipeline: &Pipeline,
    selection: Selection,
    cancel: &CancellationToken,
) -> Result<RefreshOutcome> {
    let Some(candidate) = select(pipeline, selection).await? else {
        debug!(task = selection.as_str(), "No candidates to refresh");
        return Ok(RefreshOutcome::Idle);
    };

    let outcome = refresh_candidate(pipeline, &candidate, cancel).await?;
    debug!(
        task = selection.as_str(),
        id = %candidate.id,
        outcome = ?outcome,
        "Refreshed candidate"
    );
    Ok(outcome)
}

/// Re-fetch one candidate's live state and act on the new score.
pub async fn refresh_candidate(
    pipeline: &Pipeline,
    candidate: &TweetSnapshot,
    cancel: &CancellationToken,
) -> Result<RefreshOutcome> {
    let Some(_claim) = pipeline.refresh_gate.try_claim(&candidate.id) else {
        return Ok(RefreshOutcome::Busy);
    };
    let db = pipeline.db.as_ref();

    let live = {
        let session = pipeline.pool.acquire(cancel).await?;
        match pipeline
            .crawler
            .fetch_by_id(&session, &candidate.id, cancel)
            .await
        {
            Ok(live) => live,
            Err(CrawlError::RateLimited) => return Ok(RefreshOutcome::Throttled),
            Err(e) => {
                return Err(anyhow::Error::from(e)
                    .context(format!("Failed to fetch tweet {}", candidate.id)))
            }
        }
    };

    let Some(tweet) = live else {
        db.delete_snapshot(&candidate.id).await?;
        info!(id = %candidate.id, "Tweet is gone, dropped candidate");
        return Ok(RefreshOutcome::Gone);
    };

    let (snapshot, assessment) = pipeline
        .ranking
        .capture(tweet, pipeline.ratings.as_ref(), Utc::now())
        .await?;

    if assessment.is_dead() {
        db.delete_snapshot(&snapshot.id).await?;
        info!(id = %snapshot.id, "Growth stopped, dropped candidate");
        return Ok(RefreshOutcome::Dead);
    }

    if assessment.admit {
        publish::promote(db, &snapshot).await?;
        return Ok(RefreshOutcome::Promoted);
    }

    db.save_snapshots(std::slice::from_ref(&snapshot))
        .await
        .context("Failed to save refreshed snapshot")?;
    Ok(RefreshOutcome::Updated {
        growth_speed: snapshot.growth_speed,
    })
}
