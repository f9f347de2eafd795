//! Core rate limiter implementation.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::{RateLimiterConfig, RateLimiterConfigUpdate};

use super::backoff;
use super::gate::RequestGate;
use super::window::RequestWindow;

/// Paces outbound requests against a sliding-window quota and a minimum
/// spacing between consecutive requests.
///
/// One limiter should be shared (via `Arc`) by every call site that spends
/// the same SevDesk account quota. Admissions are granted strictly in the
/// order [`acquire_slot`](Self::acquire_slot) is called, so concurrent tasks
/// can never push the window over `max_requests`.
pub struct RateLimiter {
    /// Held for the whole of an admission, including its waits
    admission: tokio::sync::Mutex<()>,
    /// Admitted requests and pacing state
    state: Mutex<LimiterState>,
    /// Current settings, replaced by `update_config`
    config: RwLock<RateLimiterConfig>,
}

#[derive(Debug, Default)]
struct LimiterState {
    requests: RequestWindow,
    last_request: Option<Instant>,
}

/// Shortest window the limiter enforces, whatever the configuration says.
const MIN_WINDOW: Duration = Duration::from_millis(1);

/// Window and quota actually enforced for `config`.
fn enforced_quota(config: &RateLimiterConfig) -> (Duration, usize) {
    (
        config.window().max(MIN_WINDOW),
        config.max_requests.max(1) as usize,
    )
}

/// Result of checking the quota at a given instant.
enum Admission {
    Granted,
    WaitUntil(Instant),
}

/// Snapshot of a limiter's window, as returned by [`RateLimiter::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStatus {
    /// Requests admitted within the current window
    pub requests_in_window: usize,
    /// How many of those were retries
    pub retries_in_window: usize,
    /// Configured quota
    pub max_requests: u32,
    /// Enforced window length
    pub window: Duration,
    /// Earliest instant at which an admission will not block
    pub next_available_slot: Instant,
    /// When this snapshot was taken
    pub observed_at: Instant,
}

impl RateLimiterStatus {
    /// Time an admission requested now would have to wait.
    pub fn wait_time(&self) -> Duration {
        self.next_available_slot
            .saturating_duration_since(self.observed_at)
    }
}

impl RateLimiter {
    /// Create a new rate limiter with the given settings.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            admission: tokio::sync::Mutex::new(()),
            state: Mutex::new(LimiterState::default()),
            config: RwLock::new(config),
        }
    }

    /// Create a rate limiter from defaults overridden by `update`.
    pub fn with_update(update: RateLimiterConfigUpdate) -> Self {
        Self::new(RateLimiterConfig::default().merge(update))
    }

    /// Get the current configuration.
    pub fn config(&self) -> RateLimiterConfig {
        *self.config.read()
    }

    /// Merge `update` into the current configuration.
    ///
    /// Already recorded requests are kept; the next admission decision is
    /// made against the new window and quota.
    pub fn update_config(&self, update: RateLimiterConfigUpdate) {
        let mut config = self.config.write();
        *config = config.merge(update);
        if let Err(e) = config.validate() {
            warn!(error = %e, "Invalid rate limiter configuration, enforcing at least one request per 1ms");
        }
        info!(
            max_requests = config.max_requests,
            window_ms = config.window_ms,
            min_delay_ms = config.min_delay_ms,
            max_retries = config.max_retries,
            base_retry_delay_ms = config.base_retry_delay_ms,
            "Rate limiter configuration updated"
        );
    }

    /// Wait until a request may be issued, then record it.
    ///
    /// Call this immediately before every outbound request. It never fails;
    /// it only delays.
    pub async fn acquire_slot(&self) {
        self.admit(0).await
    }

    /// Same as [`acquire_slot`](Self::acquire_slot) for retry number
    /// `retry_count` of a failed operation.
    pub async fn acquire_retry_slot(&self, retry_count: u32) {
        self.admit(retry_count).await
    }

    async fn admit(&self, retry_count: u32) {
        let _turn = self.admission.lock().await;

        if let Some(wait) = self.pacing_delay() {
            debug!(
                wait_ms = wait.as_millis() as u64,
                "Waiting for minimum request spacing"
            );
            sleep(wait).await;
        }

        loop {
            match self.try_admit(retry_count) {
                Admission::Granted => return,
                Admission::WaitUntil(until) => {
                    debug!(
                        wait_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
                        "Request window full, waiting for oldest request to expire"
                    );
                    sleep_until(until).await;
                }
            }
        }
    }

    /// Remaining time before the minimum spacing since the last request
    /// has elapsed, if any.
    fn pacing_delay(&self) -> Option<Duration> {
        let config = self.config();
        let (window, _) = enforced_quota(&config);
        let now = Instant::now();

        let mut state = self.state.lock();
        state.requests.prune(now, window);

        let since_last = now.saturating_duration_since(state.last_request?);
        config
            .min_delay()
            .checked_sub(since_last)
            .filter(|wait| !wait.is_zero())
    }

    /// Record a request if the window has room, otherwise report when the
    /// oldest request leaves the window.
    fn try_admit(&self, retry_count: u32) -> Admission {
        let config = self.config();
        let (window, max_requests) = enforced_quota(&config);
        let now = Instant::now();

        let mut state = self.state.lock();
        state.requests.prune(now, window);

        if state.requests.len() >= max_requests {
            if let Some(until) = state.requests.oldest_expiry(window) {
                return Admission::WaitUntil(until);
            }
        }

        state.requests.push(now, retry_count);
        state.last_request = Some(now);

        trace!(
            requests_in_window = state.requests.len(),
            max_requests = max_requests,
            retry_count = retry_count,
            "Request admitted"
        );

        Admission::Granted
    }

    /// Whether another attempt is allowed after `retry_count` retries.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.config.read().max_retries
    }

    /// Delay before retrying after `retry_count` prior retries.
    ///
    /// A server-supplied `retry_after` is returned as is. Otherwise the
    /// delay is exponential in `retry_count` with jitter, capped at
    /// [`MAX_RETRY_DELAY`](super::backoff::MAX_RETRY_DELAY).
    pub fn compute_retry_delay(&self, retry_count: u32, retry_after: Option<Duration>) -> Duration {
        let base = self.config.read().base_retry_delay();
        backoff::retry_delay(base, retry_count, retry_after, &mut rand::thread_rng())
    }

    /// Inspect the current window. Expired requests are pruned first.
    pub fn status(&self) -> RateLimiterStatus {
        let config = self.config();
        let (window, max_requests) = enforced_quota(&config);
        let now = Instant::now();

        let mut state = self.state.lock();
        state.requests.prune(now, window);

        let mut next_available_slot = now;
        if let Some(last) = state.last_request {
            next_available_slot = next_available_slot.max(last + config.min_delay());
        }
        if state.requests.len() >= max_requests {
            if let Some(expiry) = state.requests.oldest_expiry(window) {
                next_available_slot = next_available_slot.max(expiry);
            }
        }

        RateLimiterStatus {
            requests_in_window: state.requests.len(),
            retries_in_window: state.requests.retries(),
            max_requests: config.max_requests,
            window,
            next_available_slot,
            observed_at: now,
        }
    }

    /// Forget every recorded request. The configuration is kept.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.requests.clear();
        state.last_request = None;
        info!("Rate limiter state reset");
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

#[async_trait]
impl RequestGate for RateLimiter {
    async fn acquire_slot(&self) {
        RateLimiter::acquire_slot(self).await
    }

    async fn acquire_retry_slot(&self, retry_count: u32) {
        RateLimiter::acquire_retry_slot(self, retry_count).await
    }

    fn should_retry(&self, retry_count: u32) -> bool {
        RateLimiter::should_retry(self, retry_count)
    }

    fn compute_retry_delay(&self, retry_count: u32, retry_after: Option<Duration>) -> Duration {
        RateLimiter::compute_retry_delay(self, retry_count, retry_after)
    }
}
