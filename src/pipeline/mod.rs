// Triage pipeline: crawl, refresh, promote and evict candidates.
//
// `Pipeline` bundles the collaborators every stage needs. It is cheap to
// clone (everything is behind an Arc) so each scheduled task owns one.
// Stages never lock across each other; every storage call is its own
// transaction.

pub mod crawl;
pub mod metrics;
pub mod publish;
pub mod refresh;
pub mod scheduler;
pub mod sweep;

use std::sync::Arc;

use crate::db::Database;
use crate::ranking::{RankingEngine, RatingCache};
use crate::twitter::search::Crawler;
use crate::twitter::session::SessionPool;

use refresh::RefreshGate;

/// Named references to everything the pipeline stages call.
#[derive(Clone)]
pub struct Pipeline {
    pub db: Arc<dyn Database>,
    pub pool: Arc<SessionPool>,
    pub crawler: Crawler,
    pub ranking: RankingEngine,
    pub ratings: Arc<RatingCache>,
    pub refresh_gate: Arc<RefreshGate>,
}

impl Pipeline {
    pub fn new(
        db: Arc<dyn Database>,
        pool: Arc<SessionPool>,
        crawler: Crawler,
        ranking: RankingEngine,
        ratings: Arc<RatingCache>,
    ) -> Self {
        Self {
            db,
            pool,
            crawler,
            ranking,
            ratings,
            refresh_gate: Arc::new(RefreshGate::default()),
        }
    }
}
