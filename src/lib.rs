//! sevdesk-pacer - Request pacing for the SevDesk API
//!
//! This crate paces outbound calls to the SevDesk accounting REST API. A
//! [`RateLimiter`](ratelimit::RateLimiter) enforces a sliding-window quota
//! and a minimum spacing between requests, and computes backoff delays for
//! failed calls. [`RetryPipeline`](client::RetryPipeline) ties both into a
//! single explicit request stage.

pub mod client;
pub mod config;
pub mod error;
pub mod ratelimit;
