//! Sliding window of admitted requests.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// One admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRecord {
    /// When the request was admitted
    pub timestamp: Instant,
    /// Number of prior retries of the logical operation this request belongs to
    pub retry_count: u32,
}

/// Admitted requests ordered oldest first.
///
/// Records are appended as they are admitted, so timestamps are always
/// ascending and expiry only ever removes a prefix.
#[derive(Debug, Default)]
pub struct RequestWindow {
    records: VecDeque<RequestRecord>,
}

impl RequestWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every record that is no longer within `window` of `now`.
    ///
    /// A record stays while `now - timestamp < window`.
    pub fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.records.front() {
            if now.saturating_duration_since(oldest.timestamp) < window {
                break;
            }
            self.records.pop_front();
        }
    }

    /// Append a record for a request admitted at `timestamp`.
    pub fn push(&mut self, timestamp: Instant, retry_count: u32) {
        self.records.push_back(RequestRecord {
            timestamp,
            retry_count,
        });
    }

    /// The oldest record still held.
    pub fn oldest(&self) -> Option<&RequestRecord> {
        self.records.front()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are held.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of held records that were retries.
    pub fn retries(&self) -> usize {
        self.records.iter().filter(|r| r.retry_count > 0).count()
    }

    /// Remove every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Instant at which the oldest record leaves the window.
    pub fn oldest_expiry(&self, window: Duration) -> Option<Instant> {
        self.oldest().map(|r| r.timestamp + window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_insertion_order() {
        let base = Instant::now();
        let mut window = RequestWindow::new();

        window.push(base, 0);
        window.push(base + Duration::from_millis(10), 1);

        assert_eq!(window.len(), 2);
        assert_eq!(window.oldest().map(|r| r.timestamp), Some(base));
        assert_eq!(window.retries(), 1);
    }

    #[test]
    fn test_prune_removes_expired_prefix() {
        let base = Instant::now();
        let window_len = Duration::from_millis(1000);
        let mut window = RequestWindow::new();

        window.push(base, 0);
        window.push(base + Duration::from_millis(400), 0);
        window.push(base + Duration::from_millis(800), 0);

        window.prune(base + Duration::from_millis(999), window_len);
        assert_eq!(window.len(), 3);

        // Exactly one window after admission the record is out.
        window.prune(base + Duration::from_millis(1000), window_len);
        assert_eq!(window.len(), 2);

        window.prune(base + Duration::from_millis(1800), window_len);
        assert!(window.is_empty());
    }

    #[test]
    fn test_oldest_expiry() {
        let base = Instant::now();
        let mut window = RequestWindow::new();
        assert_eq!(window.oldest_expiry(Duration::from_secs(1)), None);

        window.push(base, 0);
        assert_eq!(
            window.oldest_expiry(Duration::from_secs(1)),
            Some(base + Duration::from_secs(1))
        );
    }

    #[test]
    fn test_clear() {
        let mut window = RequestWindow::new();
        window.push(Instant::now(), 0);
        window.clear();
        assert!(window.is_empty());
    }
}
