//! Request pacing and retry backoff.

mod limiter;
mod window;
mod gate;
pub mod backoff;

pub use limiter::{RateLimiter, RateLimiterStatus};
pub use window::{RequestRecord, RequestWindow};
pub use gate::RequestGate;
pub use backoff::{parse_retry_after, MAX_RETRY_DELAY};
