//! Sliding window request counter keyed by identity.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::clock::SharedClock;

/// Admitted request instants for one identity.
#[derive(Debug, Clone)]
pub struct RateWindowEntry {
    hits: VecDeque<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
}

impl RateWindowEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            hits: VecDeque::new(),
            last_seen: now,
        }
    }

    /// Drop instants that are no longer strictly inside the window.
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        while self.hits.front().is_some_and(|t| *t <= cutoff) {
            self.hits.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }
}

/// Result of a single admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Requests still admissible in the current window after this one
    pub remaining: u32,
    /// Time until the oldest instant leaves the window; set on rejection
    pub retry_after: Option<Duration>,
}

/// Per-identity sliding window limiter.
///
/// Each identity owns the list of admitted instants inside the trailing
/// window. A request is admitted iff fewer than `limit` instants remain in
/// the window, and only admitted requests are appended, so a rejected caller
/// cannot extend its own penalty.
///
/// # Thread Safety
///
/// Decisions for one identity are serialized by the map's per-entry write
/// lock, so concurrent callers never push the count above `limit`. Different
/// identities proceed in parallel unless they share a shard.
pub struct SlidingWindowLimiter {
    windows: DashMap<String, RateWindowEntry>,
    clock: SharedClock,
}

impl SlidingWindowLimiter {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Admit or reject one request for `identity`.
    pub fn allow(&self, identity: &str, limit: u32, window: Duration) -> bool {
        self.admit(identity, limit, window).allowed
    }

    /// Like [`allow`](Self::allow) but reports remaining capacity and retry delay.
    pub fn admit(&self, identity: &str, limit: u32, window: Duration) -> Admission {
        let now = self.clock.now();
        let cutoff = now - window;

        let mut entry = self
            .windows
            .entry(identity.to_string())
            .or_insert_with(|| RateWindowEntry::new(now));
        entry.last_seen = now;
        entry.prune(cutoff);

        let count = entry.hits.len() as u32;
        if count < limit {
            entry.hits.push_back(now);
            return Admission {
                allowed: true,
                remaining: limit - count - 1,
                retry_after: None,
            };
        }

        let retry_after = entry
            .hits
            .front()
            .map(|oldest| *oldest + window - now)
            .unwrap_or(window);

        Admission {
            allowed: false,
            remaining: 0,
            retry_after: Some(retry_after),
        }
    }

    /// Requests still admissible for `identity` without recording anything.
    pub fn remaining(&self, identity: &str, limit: u32, window: Duration) -> u32 {
        let cutoff = self.clock.now() - window;
        let used = self
            .windows
            .get(identity)
            .map(|entry| entry.hits.iter().filter(|t| **t > cutoff).count() as u32)
            .unwrap_or(0);
        limit.saturating_sub(used)
    }

    /// Forget everything recorded for `identity`.
    pub fn reset(&self, identity: &str) {
        self.windows.remove(identity);
    }

    /// Remove identities whose last activity is older than `idle`.
    ///
    /// Returns the number of identities evicted.
    pub fn evict_idle(&self, idle: Duration) -> usize {
        let cutoff = self.clock.now() - idle;
        let before = self.windows.len();
        self.windows.retain(|_, entry| entry.last_seen > cutoff);
        before.saturating_sub(self.windows.len())
    }

    /// Number of identities currently tracked.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Number of instants recorded for `identity`.
    pub fn window_len(&self, identity: &str) -> usize {
        self.windows.get(identity).map(|e| e.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::sync::Arc;

    fn limiter() -> (SlidingWindowLimiter, MockClock) {
        let clock = MockClock::new();
        (SlidingWindowLimiter::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_rejects_beyond_limit() {
        let (limiter, _clock) = limiter();
        let window = Duration::minutes(1);

        for _ in 0..5 {
            assert!(limiter.allow("10.0.0.1", 5, window));
        }
        for _ in 0..3 {
            assert!(!limiter.allow("10.0.0.1", 5, window));
        }
        assert_eq!(limiter.window_len("10.0.0.1"), 5);
    }

    #[test]
    fn test_accepts_again_after_window_slides() {
        let (limiter, clock) = limiter();
        let window = Duration::minutes(1);

        assert!(limiter.allow("ip", 2, window));
        clock.advance(Duration::seconds(30));
        assert!(limiter.allow("ip", 2, window));
        assert!(!limiter.allow("ip", 2, window));

        // First instant leaves the window, second one is still inside
        clock.advance(Duration::seconds(31));
        assert!(limiter.allow("ip", 2, window));
        assert!(!limiter.allow("ip", 2, window));
    }

    #[test]
    fn test_rejected_calls_do_not_extend_window() {
        let (limiter, clock) = limiter();
        let window = Duration::seconds(10);

        assert!(limiter.allow("ip", 1, window));
        for _ in 0..9 {
            clock.advance(Duration::seconds(1));
            assert!(!limiter.allow("ip", 1, window));
        }

        // Exactly one window after the only admitted request
        clock.advance(Duration::seconds(1));
        assert!(limiter.allow("ip", 1, window));
    }

    #[test]
    fn test_admission_reports_retry_after() {
        let (limiter, clock) = limiter();
        let window = Duration::seconds(60);

        let first = limiter.admit("ip", 1, window);
        assert!(first.allowed);
        assert_eq!(first.remaining, 0);

        clock.advance(Duration::seconds(20));
        let rejected = limiter.admit("ip", 1, window);
        assert!(!rejected.allowed);
        assert_eq!(rejected.retry_after, Some(Duration::seconds(40)));
    }

    #[test]
    fn test_identities_are_independent() {
        let (limiter, _clock) = limiter();
        let window = Duration::minutes(1);

        assert!(limiter.allow("a", 1, window));
        assert!(!limiter.allow("a", 1, window));
        assert!(limiter.allow("b", 1, window));
        assert_eq!(limiter.remaining("b", 3, window), 2);
        assert_eq!(limiter.remaining("unknown", 3, window), 3);
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let (limiter, _clock) = limiter();
        assert!(!limiter.allow("ip", 0, Duration::minutes(1)));
    }

    #[test]
    fn test_evict_idle() {
        let (limiter, clock) = limiter();
        let window = Duration::minutes(1);

        limiter.allow("old", 10, window);
        clock.advance(Duration::minutes(8));
        limiter.allow("recent", 10, window);
        clock.advance(Duration::minutes(3));

        assert_eq!(limiter.evict_idle(Duration::minutes(10)), 1);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.window_len("old"), 0);
        assert_eq!(limiter.window_len("recent"), 1);
    }

    #[test]
    fn test_reset() {
        let (limiter, _clock) = limiter();
        limiter.allow("ip", 1, Duration::minutes(1));
        limiter.reset("ip");
        assert!(limiter.is_empty());
        assert!(limiter.allow("ip", 1, Duration::minutes(1)));
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_limit() {
        let limiter = Arc::new(SlidingWindowLimiter::new(Arc::new(MockClock::new())));
        let window = Duration::minutes(1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.allow("shared", 100, window))
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
        assert_eq!(limiter.window_len("shared"), 100);
    }
}
