// Adaptive pacing for one crawl identity.
//
// The platform does not publish its limits, so each identity learns them.
// The governor keeps an integer inter-request delay (seconds) and a floor
// under it. Throttling pushes the delay up by a random jitter and raises
// the floor; finished batches and queries walk it back down. The floor
// itself relaxes slowly after clean queries so one old throttle does not
// cap throughput forever.
//
// With window learning enabled, the governor also tracks request timestamps
// over trailing 1 min / 1 h / 1 day windows, the same way a sliding-window
// limiter does. The first time the platform throttles, every window that
// has been observed for its full duration freezes its current count as a
// learned threshold. A periodic tick then raises the delay while any window
// sits at or above its threshold.
//
// All state lives behind one Mutex that is never held across an await, so
// the request path and the tick path can share an Arc<RateGovernor>.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tracing::{debug, info};

/// Trailing windows tracked by the learning policy.
pub const WINDOWS: [Duration; 3] = [
    Duration::from_secs(60),
    Duration::from_secs(60 * 60),
    Duration::from_secs(24 * 60 * 60),
];

/// Callback invoked synchronously with the new delay (seconds) on every change.
pub type DelaySink = Box<dyn Fn(u64) + Send + Sync>;

/// Tunables for one governor.
#[derive(Debug, Clone, Copy)]
pub struct GovernorSettings {
    /// Delay an identity starts with, in seconds (clamped to at least 1).
    pub initial_delay_secs: u64,
    /// Enable the window-threshold-learning policy on top of plain backoff.
    pub window_learning: bool,
    /// How much a saturated window raises the delay per tick.
    pub saturation_step_secs: u64,
    /// The floor only relaxes while it is above this value.
    pub relax_floor_above: u64,
    /// Hard ceiling for the delay, in seconds.
    pub max_delay_secs: u64,
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: 1,
            window_learning: true,
            saturation_step_secs: 10,
            relax_floor_above: 4,
            max_delay_secs: 60 * 60,
        }
    }
}

/// Snapshot of one trailing window, for metrics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestWindow {
    pub duration: Duration,
    /// Requests issued within the trailing window.
    pub count: u64,
    /// Learned count at which the platform throttled, once known.
    pub threshold: Option<u64>,
}

struct GovernorState {
    current_delay: u64,
    minimal_delay: u64,
    /// Request timestamps within the longest window, oldest first.
    requests: VecDeque<Instant>,
    thresholds: [Option<u64>; 3],
    throttled_once: bool,
    rng: StdRng,
}

impl GovernorState {
    fn evict(&mut self, now: Instant) {
        let longest = WINDOWS[WINDOWS.len() - 1];
        while let Some(&oldest) = self.requests.front() {
            if now.duration_since(oldest) > longest {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }

    fn count_within(&self, now: Instant, window: Duration) -> u64 {
        self.requests
            .iter()
            .rev()
            .take_while(|t| now.duration_since(**t) <= window)
            .count() as u64
    }

    fn decay(&mut self) {
        if self.current_delay > self.minimal_delay {
            self.current_delay -= 1;
        }
    }
}

/// Produces the current inter-request delay for one crawl identity.
pub struct RateGovernor {
    label: String,
    settings: GovernorSettings,
    started_at: Instant,
    state: Mutex<GovernorState>,
    sink: RwLock<Option<DelaySink>>,
}

impl RateGovernor {
    /// Create a governor seeded from the OS random source.
    pub fn new(label: impl Into<String>, settings: GovernorSettings) -> Self {
        Self::with_rng(label, settings, StdRng::from_rng(&mut rand::rng()))
    }

    /// Create a governor with an explicit jitter source (deterministic in tests).
    pub fn with_rng(label: impl Into<String>, settings: GovernorSettings, rng: StdRng) -> Self {
        let initial = settings
            .initial_delay_secs
            .clamp(1, settings.max_delay_secs.max(1));
        Self {
            label: label.into(),
            settings,
            started_at: Instant::now(),
            state: Mutex::new(GovernorState {
                current_delay: initial,
                minimal_delay: 1,
                requests: VecDeque::new(),
                thresholds: [None; 3],
                throttled_once: false,
                rng,
            }),
            sink: RwLock::new(None),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Register the callback that observes every delay change.
    pub fn set_delay_sink(&self, sink: impl Fn(u64) + Send + Sync + 'static) {
        let mut slot = self.sink.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Box::new(sink));
    }

    pub fn current_delay(&self) -> u64 {
        self.lock().current_delay
    }

    pub fn minimal_delay(&self) -> u64 {
        self.lock().minimal_delay
    }

    /// The current delay as a Duration, ready to sleep on.
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.current_delay())
    }

    /// React to a throttling signal from the platform.
    ///
    /// Raises the floor to just under the current delay, then grows the
    /// delay by a random step in `[1, current + 1 - floor/2]` so identities
    /// that were throttled together do not retry together.
    pub fn too_many_requests(&self) {
        let (before, after) = {
            let mut state = self.lock();
            let before = state.current_delay;
            if state.current_delay == 0 {
                state.current_delay = 1;
            }
            let floor = state.current_delay.saturating_sub(1).max(1);
            state.minimal_delay = state.minimal_delay.max(floor);

            let upper = state.current_delay + 1 - state.minimal_delay / 2;
            let jitter = state.rng.random_range(1..=upper.max(1));
            state.current_delay = (state.current_delay + jitter)
                .min(self.settings.max_delay_secs.max(state.minimal_delay + 1));

            state.throttled_once = true;
            if self.settings.window_learning {
                self.learn_thresholds(&mut state, Instant::now());
            }
            (before, state.current_delay)
        };

        info!(
            identity = %self.label,
            delay_secs = after,
            "Throttled by platform, backing off from {}s to {}s",
            before,
            after
        );
        self.notify(before, after);
    }

    /// One fixed-size batch of a result stream was consumed.
    pub fn processed_batch(&self) {
        let (before, after) = {
            let mut state = self.lock();
            let before = state.current_delay;
            state.decay();
            (before, state.current_delay)
        };
        self.notify(before, after);
    }

    /// A paginated query finished without throttling.
    ///
    /// Same decay as a batch, plus one step of floor relaxation.
    pub fn processed_query(&self) {
        let (before, after) = {
            let mut state = self.lock();
            let before = state.current_delay;
            state.decay();
            if state.minimal_delay > self.settings.relax_floor_above {
                state.minimal_delay -= 1;
            }
            (before, state.current_delay)
        };
        self.notify(before, after);
    }

    /// Count one outbound request against every trailing window.
    pub fn record_request(&self) {
        if !self.settings.window_learning {
            return;
        }
        let now = Instant::now();
        let mut state = self.lock();
        state.evict(now);
        state.requests.push_back(now);
    }

    /// Periodic adjustment for the window-learning policy.
    ///
    /// Raises the delay while any window is at or above its learned
    /// threshold, capped at twice the window's sustainable spacing;
    /// otherwise decays the delay by one toward the floor.
    pub fn tick(&self) {
        if !self.settings.window_learning {
            return;
        }
        let now = Instant::now();
        let (before, after) = {
            let mut state = self.lock();
            state.evict(now);
            self.learn_thresholds(&mut state, now);

            let mut cap: Option<u64> = None;
            for (i, window) in WINDOWS.iter().enumerate() {
                if let Some(threshold) = state.thresholds[i] {
                    if state.count_within(now, *window) >= threshold {
                        let spacing = (2 * window.as_secs() / threshold.max(1)).max(1);
                        cap = Some(cap.map_or(spacing, |c| c.max(spacing)));
                    }
                }
            }

            let before = state.current_delay;
            match cap {
                Some(cap) => {
                    if state.current_delay < cap {
                        state.current_delay =
                            (state.current_delay + self.settings.saturation_step_secs).min(cap);
                    }
                }
                None => state.decay(),
            }
            (before, state.current_delay)
        };
        self.notify(before, after);
    }

    /// Current per-window counts and learned thresholds.
    pub fn windows(&self) -> Vec<RequestWindow> {
        let now = Instant::now();
        let state = self.lock();
        WINDOWS
            .iter()
            .enumerate()
            .map(|(i, window)| RequestWindow {
                duration: *window,
                count: state.count_within(now, *window),
                threshold: state.thresholds[i],
            })
            .collect()
    }

    fn learn_thresholds(&self, state: &mut GovernorState, now: Instant) {
        if !state.throttled_once {
            return;
        }
        let elapsed = now.duration_since(self.started_at);
        for (i, window) in WINDOWS.iter().enumerate() {
            if state.thresholds[i].is_none() && elapsed >= *window {
                let count = state.count_within(now, *window).max(1);
                state.thresholds[i] = Some(count);
                info!(
                    identity = %self.label,
                    window_secs = window.as_secs(),
                    threshold = count,
                    "Learned request threshold"
                );
            }
        }
    }

    fn notify(&self, before: u64, after: u64) {
        if before == after {
            return;
        }
        debug!(identity = %self.label, from = before, to = after, "Delay changed");
        let sink = self.sink.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(sink) = sink.as_ref() {
            sink(after);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GovernorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
