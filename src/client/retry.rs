//! Paced request execution with bounded retries.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::ratelimit::{parse_retry_after, RequestGate};

/// Errors that the retry pipeline knows how to classify.
pub trait RetryableError {
    /// Whether the failed request is worth issuing again.
    fn is_retryable(&self) -> bool {
        true
    }

    /// Server-supplied wait before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// A non-success HTTP response from the SevDesk API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpStatusError {
    /// Response status code
    pub status: u16,
    /// Parsed `Retry-After` header, if the response carried one
    pub retry_after: Option<Duration>,
}

impl HttpStatusError {
    /// Build from a status code and the raw `Retry-After` header value.
    pub fn new(status: u16, retry_after_header: Option<&str>) -> Self {
        Self {
            status,
            retry_after: retry_after_header.and_then(parse_retry_after),
        }
    }
}

impl fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP status {}", self.status)
    }
}

impl std::error::Error for HttpStatusError {}

impl RetryableError for HttpStatusError {
    /// Rate-limit responses, request timeouts and server errors are retried.
    fn is_retryable(&self) -> bool {
        matches!(self.status, 408 | 429) || (500..600).contains(&self.status)
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// Runs operations through a request gate: wait for a slot, issue the
/// request, and on a retryable failure back off and try again until the
/// gate's retry budget is spent.
///
/// The gate is injected by whoever owns the API client, so every pipeline
/// spending the same account quota should share one gate.
pub struct RetryPipeline<G: RequestGate> {
    gate: Arc<G>,
}

impl<G: RequestGate> RetryPipeline<G> {
    /// Create a pipeline that paces through `gate`.
    pub fn new(gate: Arc<G>) -> Self {
        Self { gate }
    }

    /// The gate this pipeline paces through.
    pub fn gate(&self) -> &Arc<G> {
        &self.gate
    }

    /// Execute `op`, retrying failures as the gate allows.
    ///
    /// `op` receives the 0-based retry count of the attempt. The last
    /// error is returned unchanged once retries are exhausted or the error
    /// is not retryable.
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + fmt::Display,
    {
        let mut retry_count = 0;

        loop {
            if retry_count == 0 {
                self.gate.acquire_slot().await;
            } else {
                self.gate.acquire_retry_slot(retry_count).await;
            }

            let err = match op(retry_count).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!(error = %err, "Request failed with non-retryable error");
                return Err(err);
            }

            if !self.gate.should_retry(retry_count) {
                warn!(
                    error = %err,
                    retries = retry_count,
                    "Request failed, retries exhausted"
                );
                return Err(err);
            }

            let delay = self.gate.compute_retry_delay(retry_count, err.retry_after());
            warn!(
                error = %err,
                retry_count = retry_count,
                delay_ms = delay.as_millis() as u64,
                "Request failed, retrying"
            );
            sleep(delay).await;
            retry_count += 1;
        }
    }
}

impl<G: RequestGate> Clone for RetryPipeline<G> {
    fn clone(&self) -> Self {
        Self {
            gate: Arc::clone(&self.gate),
        }
    }
}
