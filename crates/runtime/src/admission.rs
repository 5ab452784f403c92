//! Per-caller admission control over fixed time windows.
//!
//! Each caller identity gets a window of length W. Within a window up to the
//! identity's limit of requests are admitted; further requests are denied and
//! may be deferred. Deferred work is replayed one entry per window reset and
//! counts against the window it runs in, so a backlog drains at one task
//! per W.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chorus_config::AdmissionConfig;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

type DeferredTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Windows idle for this many window lengths are swept.
const STALE_WINDOWS: u32 = 5;

/// Window length and per-identity request limits.
#[derive(Debug, Clone)]
pub struct AdmissionLimits {
    pub window: Duration,
    pub baseline: u32,
    pub restricted: u32,
    pub restricted_identities: HashSet<String>,
}

impl AdmissionLimits {
    /// Limits with no restricted identities.
    pub fn new(window: Duration, baseline: u32) -> Self {
        Self {
            window,
            baseline,
            restricted: (baseline / 2).max(1),
            restricted_identities: HashSet::new(),
        }
    }

    /// Apply `limit` to the given identities instead of the baseline.
    pub fn with_restricted<I, S>(mut self, limit: u32, identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.restricted = limit;
        self.restricted_identities = identities.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self::new(config.window(), config.baseline_limit).with_restricted(
            config.effective_restricted_limit(),
            config.restricted_identities.iter().cloned(),
        )
    }

    /// The request limit for an identity.
    pub fn limit_for(&self, identity: &str) -> u32 {
        if self.restricted_identities.contains(identity) {
            self.restricted
        } else {
            self.baseline
        }
    }
}

struct AdmissionWindow {
    count: u32,
    start: Instant,
    deferred: VecDeque<(DeferredTask, Instant)>,
    timer_armed: bool,
}

impl AdmissionWindow {
    fn open(now: Instant, count: u32) -> Self {
        Self {
            count,
            start: now,
            deferred: VecDeque::new(),
            timer_armed: false,
        }
    }
}

/// Fixed-window rate limiter keyed by caller identity.
pub struct AdmissionController {
    limits: AdmissionLimits,
    windows: Mutex<HashMap<String, AdmissionWindow>>,
}

impl AdmissionController {
    pub fn new(limits: AdmissionLimits) -> Self {
        Self {
            limits,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> &AdmissionLimits {
        &self.limits
    }

    /// Count a request against `identity`'s window. Returns `true` if admitted.
    pub fn try_admit(&self, identity: &str) -> bool {
        let now = Instant::now();
        let limit = self.limits.limit_for(identity);
        let mut windows = self.lock();

        let Some(window) = windows.get_mut(identity) else {
            windows.insert(identity.to_string(), AdmissionWindow::open(now, 1));
            return true;
        };

        if now.duration_since(window.start) >= self.limits.window {
            window.count = 1;
            window.start = now;
            true
        } else if window.count < limit {
            window.count += 1;
            true
        } else {
            debug!(identity, count = window.count, limit, "Request denied");
            false
        }
    }

    /// Time until `identity`'s current window ends (zero if it has none).
    pub fn time_until_reset(&self, identity: &str) -> Duration {
        let now = Instant::now();
        self.lock()
            .get(identity)
            .map(|window| (window.start + self.limits.window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Queue `task` to run after `identity`'s window resets.
    ///
    /// Each reset runs only the oldest deferred task and counts it against
    /// the window it runs in. Returns the estimated wait: the time until the
    /// current window ends plus one window per task already queued ahead.
    pub fn defer_until_reset<F>(self: &Arc<Self>, identity: &str, task: F) -> Duration
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let now = Instant::now();
        let mut windows = self.lock();
        let window = windows
            .entry(identity.to_string())
            .or_insert_with(|| AdmissionWindow::open(now, 0));

        let ahead = window.deferred.len() as u32;
        let deadline = window.start + self.limits.window;
        window.deferred.push_back((Box::pin(task), now));
        info!(identity, deferred = window.deferred.len(), "Request deferred");

        if !window.timer_armed {
            window.timer_armed = true;
            self.arm(identity.to_string(), deadline);
        }
        deadline.saturating_duration_since(now) + self.limits.window * ahead
    }

    /// Number of deferred tasks waiting for `identity`.
    pub fn deferred_count(&self, identity: &str) -> usize {
        self.lock()
            .get(identity)
            .map_or(0, |window| window.deferred.len())
    }

    /// Number of tracked identities.
    pub fn window_count(&self) -> usize {
        self.lock().len()
    }

    /// Drop windows that started over 5×W ago and hold no deferred work.
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let stale_after = self.limits.window * STALE_WINDOWS;
        let mut windows = self.lock();
        let before = windows.len();
        windows.retain(|_, window| {
            window.timer_armed
                || !window.deferred.is_empty()
                || now.duration_since(window.start) < stale_after
        });
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, remaining = windows.len(), "Swept stale admission windows");
        }
        removed
    }

    /// Run [`sweep`](Self::sweep) every `every` until the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                controller.sweep();
            }
        })
    }

    fn arm(self: &Arc<Self>, identity: String, deadline: Instant) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            controller.on_reset(&identity);
        });
    }

    fn on_reset(self: &Arc<Self>, identity: &str) {
        let now = Instant::now();
        let limit = self.limits.limit_for(identity);
        let next = {
            let mut windows = self.lock();
            let Some(window) = windows.get_mut(identity) else {
                return;
            };
            if now.duration_since(window.start) >= self.limits.window {
                window.count = 0;
                window.start = now;
            }

            // A fresh request may already have opened and filled this window
            let next = if window.count < limit {
                window.count += 1;
                window.deferred.pop_front()
            } else {
                debug!(identity, count = window.count, "Replay postponed to next window");
                None
            };
            if window.deferred.is_empty() {
                window.timer_armed = false;
            } else {
                self.arm(identity.to_string(), window.start + self.limits.window);
            }
            next
        };

        if let Some((task, enqueued_at)) = next {
            info!(
                identity,
                waited_ms = now.duration_since(enqueued_at).as_millis() as u64,
                "Replaying deferred request"
            );
            tokio::spawn(task);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AdmissionWindow>> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }
}
