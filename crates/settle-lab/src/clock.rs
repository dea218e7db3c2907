#![forbid(unsafe_code)]

//! Virtual monotonic time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use web_time::Duration;

/// A manually-advanced clock.
///
/// All clones share the same time, including clones moved to other threads.
/// Time only moves forward.
#[derive(Debug, Clone, Default)]
pub struct LabClock {
    now_us: Arc<AtomicU64>,
}

impl LabClock {
    /// A clock starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time in microseconds since the clock was created.
    #[must_use]
    pub fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::Acquire)
    }

    /// Current virtual time as a duration since the clock was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.now_us())
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let us = duration_us(delta);
        let _ = self
            .now_us
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |now| {
                Some(now.saturating_add(us))
            });
    }

    /// Move the clock to `at_us` unless it is already past it.
    pub fn advance_to_us(&self, at_us: u64) {
        self.now_us.fetch_max(at_us, Ordering::AcqRel);
    }
}

/// Convert a duration to whole microseconds, saturating.
pub(crate) fn duration_us(duration: Duration) -> u64 {
    duration.as_micros().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero_and_advances() {
        let clock = LabClock::new();
        assert_eq!(clock.now_us(), 0);
        clock.advance(Duration::from_millis(3));
        assert_eq!(clock.now_us(), 3_000);
        assert_eq!(clock.elapsed(), Duration::from_millis(3));
    }

    #[test]
    fn clones_share_time() {
        let clock = LabClock::new();
        let other = clock.clone();
        other.advance(Duration::from_micros(10));
        assert_eq!(clock.now_us(), 10);
    }

    #[test]
    fn advance_to_never_goes_back() {
        let clock = LabClock::new();
        clock.advance_to_us(50);
        clock.advance_to_us(20);
        assert_eq!(clock.now_us(), 50);
    }

    #[test]
    fn advance_saturates() {
        let clock = LabClock::new();
        clock.advance_to_us(u64::MAX - 1);
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now_us(), u64::MAX);
    }

    #[test]
    fn shared_across_threads() {
        let clock = LabClock::new();
        let remote = clock.clone();
        std::thread::spawn(move || remote.advance(Duration::from_micros(7)))
            .join()
            .expect("clock thread");
        assert_eq!(clock.now_us(), 7);
    }
}
