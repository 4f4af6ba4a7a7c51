//! Monotonic clock capability
//!
//! The acquisition loop never reads ambient time directly. It is handed a
//! [`Clock`], which is a [`MonotonicClock`] in production and a
//! [`ManualClock`] in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Source of monotonic time with an arbitrary origin
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for deterministic tests
///
/// Clones share the same time, so a stream backend can advance the clock
/// that the acquisition loop is reading.
///
/// # Example
/// ```
/// use neuroacq_core::clock::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let shared = clock.clone();
/// shared.advance(Duration::from_millis(100));
/// assert_eq!(clock.now(), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set(&self, at: Duration) {
        self.nanos.store(at.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

static PROCESS_ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Process-wide local clock in seconds
///
/// All stream timestamps are expressed against this base once corrected
/// with the stream's clock offset.
pub fn local_clock() -> f64 {
    PROCESS_ORIGIN.get_or_init(Instant::now).elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.now() > a);
    }

    #[test]
    fn test_manual_clock_set_and_advance() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        clock.set(Duration::from_secs(5));
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), Duration::from_millis(5250));
    }

    #[test]
    fn test_local_clock_is_monotonic() {
        let a = local_clock();
        let b = local_clock();
        assert!(b >= a);
    }
}
