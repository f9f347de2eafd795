//! Request gate trait for abstracting the limiter away from call sites.

use async_trait::async_trait;
use std::time::Duration;

/// Trait for anything that paces outbound requests.
///
/// Call sites wait on the gate immediately before issuing a request and
/// consult it when a request fails. [`RateLimiter`](super::RateLimiter)
/// is the production implementation.
#[async_trait]
pub trait RequestGate: Send + Sync {
    /// Wait until a fresh request may be issued and record it.
    async fn acquire_slot(&self);

    /// Wait until retry number `retry_count` may be issued and record it.
    async fn acquire_retry_slot(&self, retry_count: u32);

    /// Whether another attempt is allowed after `retry_count` retries.
    fn should_retry(&self, retry_count: u32) -> bool;

    /// Delay before the next attempt, honouring a server hint if given.
    fn compute_retry_delay(&self, retry_count: u32, retry_after: Option<Duration>) -> Duration;
}
