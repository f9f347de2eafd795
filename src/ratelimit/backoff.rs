//! Retry delay computation.
//!
//! Delays grow exponentially from a base with up to a second of random
//! jitter so that clients retrying the same failure spread out. A
//! server-supplied `Retry-After` hint always takes precedence.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

/// Upper bound on computed backoff. Server hints are not capped.
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(30_000);

/// Jitter is drawn uniformly from `[0, MAX_JITTER_MS)` milliseconds.
pub const MAX_JITTER_MS: u64 = 1_000;

/// Compute `min(base * 2^retry_count + jitter, MAX_RETRY_DELAY)`.
pub fn backoff_delay<R: Rng>(base: Duration, retry_count: u32, rng: &mut R) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let factor = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
    let jitter = rng.gen_range(0..MAX_JITTER_MS);

    let delay_ms = base_ms.saturating_mul(factor).saturating_add(jitter);
    Duration::from_millis(delay_ms).min(MAX_RETRY_DELAY)
}

/// Pick the delay before retry number `retry_count + 1`.
pub fn retry_delay<R: Rng>(
    base: Duration,
    retry_count: u32,
    retry_after: Option<Duration>,
    rng: &mut R,
) -> Duration {
    match retry_after {
        Some(hint) => hint,
        None => backoff_delay(base, retry_count, rng),
    }
}

/// Parse an HTTP `Retry-After` header value.
///
/// Accepts delta-seconds (digits only) or an HTTP-date. Dates in the past
/// yield a zero delay. Returns `None` for anything unparseable, including
/// delta-seconds too large for a `u64`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    parse_retry_after_at(value, Utc::now())
}

/// [`parse_retry_after`] against an explicit current time.
pub fn parse_retry_after_at(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if value.bytes().all(|b| b.is_ascii_digit()) {
        return value.parse::<u64>().ok().map(Duration::from_secs);
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_backoff_third_retry_within_jitter_range() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..100 {
            let delay = backoff_delay(Duration::from_secs(1), 3, &mut rng);
            assert!(delay >= Duration::from_millis(8_000));
            assert!(delay < Duration::from_millis(9_000));
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(backoff_delay(Duration::from_secs(1), 5, &mut rng), MAX_RETRY_DELAY);
        assert_eq!(backoff_delay(Duration::from_secs(1), 200, &mut rng), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_zero_base_is_jitter_only() {
        let mut rng = StdRng::seed_from_u64(1);
        let delay = backoff_delay(Duration::ZERO, 4, &mut rng);
        assert!(delay < Duration::from_millis(MAX_JITTER_MS));
    }

    #[test]
    fn test_retry_after_hint_wins_uncapped() {
        let mut rng = StdRng::seed_from_u64(3);

        let delay = retry_delay(Duration::from_secs(1), 0, Some(Duration::from_secs(5)), &mut rng);
        assert_eq!(delay, Duration::from_millis(5_000));

        let delay = retry_delay(Duration::from_secs(1), 9, Some(Duration::from_secs(120)), &mut rng);
        assert_eq!(delay, Duration::from_secs(120));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_oversized_seconds() {
        assert_eq!(parse_retry_after("99999999999999999999999"), None);
        assert_eq!(
            parse_retry_after("18446744073709551615"),
            Some(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn test_parse_retry_after_rejects_non_digit_seconds() {
        assert_eq!(parse_retry_after("1.5"), None);
        assert_eq!(parse_retry_after("1e3"), None);
        assert_eq!(parse_retry_after("+5"), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2015 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(
            parse_retry_after_at("Wed, 21 Oct 2015 07:28:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after_at("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_parse_retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after(""), None);
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after("inf"), None);
    }
}
