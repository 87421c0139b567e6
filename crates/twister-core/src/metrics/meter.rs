//! Event-rate meter: a monotonic counter with a one-minute
//! exponentially weighted moving average, advanced on a five second
//! tick cadence.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Seconds between two ticks. Rates are undefined if the owner ticks on
/// a different cadence.
pub const TICK_INTERVAL_SECS: u64 = 5;

// one-minute EWMA smoothing constant for a 5s tick
const ALPHA: f64 = 1.0 - 0.920_044_414_629_323_1; // 1 - exp(-5/60)

/// A meter measuring a count and its one-minute rate.
pub struct Meter {
    count: AtomicU64,
    uncounted: AtomicU64,
    rate_bits: AtomicU64,
    initialized: AtomicBool,
}

impl Meter {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            uncounted: AtomicU64::new(0),
            rate_bits: AtomicU64::new(0f64.to_bits()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Record n events.
    pub fn mark(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
        self.uncounted.fetch_add(n, Ordering::Relaxed);
    }

    /// Total events recorded.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// One-minute moving average rate in events per second.
    pub fn rate1(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    /// Fold the events since the last tick into the moving average.
    pub fn tick(&self) {
        let marked = self.uncounted.swap(0, Ordering::Relaxed);
        let instant = marked as f64 / TICK_INTERVAL_SECS as f64;

        let rate = if self.initialized.swap(true, Ordering::Relaxed) {
            let prev = self.rate1();
            prev + ALPHA * (instant - prev)
        } else {
            instant
        };
        self.rate_bits.store(rate.to_bits(), Ordering::Relaxed);
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_accumulates() {
        let meter = Meter::new();
        meter.mark(1);
        meter.mark(4);
        assert_eq!(meter.count(), 5);
    }

    #[test]
    fn test_first_tick_sets_instant_rate() {
        let meter = Meter::new();
        meter.mark(50);
        meter.tick();
        assert!((meter.rate1() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rate_decays_towards_new_load() {
        let meter = Meter::new();
        meter.mark(50);
        meter.tick();
        // no traffic on the next tick, the rate must fall but stay positive
        meter.tick();
        let decayed = meter.rate1();
        assert!(decayed < 10.0);
        assert!(decayed > 0.0);
    }

    #[test]
    fn test_rate_zero_before_first_tick() {
        let meter = Meter::new();
        meter.mark(100);
        assert_eq!(meter.rate1(), 0.0);
    }
}
