//! Client-side stages for issuing SevDesk API calls.

mod retry;

pub use retry::{HttpStatusError, RetryPipeline, RetryableError};
