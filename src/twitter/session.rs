// Crawl identities and their bounded checkout pool.
//
// Each identity is a pre-authenticated bearer token plus its own
// RateGovernor, so throttling one identity never slows the others. The
// pool hands identities out through a guard that puts them back on drop,
// which covers every exit path including `?` and panics unwinding through
// a task.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::rate_limit::{GovernorSettings, RateGovernor};
use crate::error::CrawlError;

/// One pre-authenticated crawl identity.
pub struct Session {
    label: String,
    token: String,
    governor: RateGovernor,
    /// Mirror of the governor's delay, fed by its delay sink.
    pace_secs: Arc<AtomicU64>,
}

impl Session {
    pub fn new(label: impl Into<String>, token: impl Into<String>, settings: GovernorSettings) -> Self {
        let label = label.into();
        let governor = RateGovernor::new(label.clone(), settings);
        Self::with_governor(label, token, governor)
    }

    /// Build a session around an existing governor (tests inject seeded ones).
    pub fn with_governor(
        label: impl Into<String>,
        token: impl Into<String>,
        governor: RateGovernor,
    ) -> Self {
        let pace_secs = Arc::new(AtomicU64::new(governor.current_delay()));
        let sink = Arc::clone(&pace_secs);
        governor.set_delay_sink(move |delay| sink.store(delay, Ordering::Relaxed));

        Self {
            label: label.into(),
            token: token.into(),
            governor,
            pace_secs,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    /// How long to wait before the next request on this identity.
    pub fn pace(&self) -> Duration {
        Duration::from_secs(self.pace_secs.load(Ordering::Relaxed))
    }
}

/// Bounded checkout of K crawl identities.
pub struct SessionPool {
    sessions: Vec<Arc<Session>>,
    idle: Arc<Mutex<VecDeque<Arc<Session>>>>,
    permits: Arc<Semaphore>,
}

impl SessionPool {
    pub fn new(sessions: Vec<Session>) -> Self {
        let sessions: Vec<Arc<Session>> = sessions.into_iter().map(Arc::new).collect();
        Self {
            idle: Arc::new(Mutex::new(sessions.iter().cloned().collect())),
            permits: Arc::new(Semaphore::new(sessions.len())),
            sessions,
        }
    }

    /// One identity per bearer token, labelled `session-0`, `session-1`, ...
    pub fn from_tokens(tokens: &[String], settings: GovernorSettings) -> Self {
        let sessions = tokens
            .iter()
            .enumerate()
            .map(|(i, token)| Session::new(format!("session-{i}"), token.clone(), settings))
            .collect();
        Self::new(sessions)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// All identities, checked out or not (for ticking and metrics).
    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.sessions
    }

    /// Identities currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free identity, or return `Cancelled` once `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<SessionGuard, CrawlError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| anyhow!("session pool closed"))?
            }
        };

        let session = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| anyhow!("session pool permit without an idle session"))?;

        debug!(identity = session.label(), "Checked out crawl identity");

        Ok(SessionGuard {
            session,
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }
}

/// A checked-out identity. Returns itself to the pool when dropped.
pub struct SessionGuard {
    session: Arc<Session>,
    idle: Arc<Mutex<VecDeque<Arc<Session>>>>,
    // Dropped after `drop()` has put the session back, so a waiter woken by
    // the permit always finds an idle session.
    _permit: OwnedSemaphorePermit,
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        debug!(identity = self.session.label(), "Released crawl identity");
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Arc::clone(&self.session));
    }
}
