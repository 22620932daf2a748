//! Sliding-window delta rate.
//!
//! Arrivals older than one period are pruned on every tick, so memory
//! is bounded by the number of deltas seen in one period.

use bookcast_core::SpeedReport;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default reporting period.
pub const DEFAULT_SPEED_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct ThroughputMeter {
    period: Duration,
    arrivals: VecDeque<Instant>,
}

impl ThroughputMeter {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            arrivals: VecDeque::new(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Record one delta arrival.
    pub fn record(&mut self, at: Instant) {
        self.arrivals.push_back(at);
    }

    /// Number of retained arrivals.
    pub fn pending(&self) -> usize {
        self.arrivals.len()
    }

    /// Drop everything recorded so far.
    pub fn reset(&mut self) {
        self.arrivals.clear();
    }

    /// Prune arrivals older than one period and report
    /// `count * (60000 / period_ms)`.
    pub fn tick(&mut self, now: Instant) -> SpeedReport {
        while let Some(front) = self.arrivals.front() {
            if now.saturating_duration_since(*front) > self.period {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }

        let count = self.arrivals.iter().filter(|at| **at <= now).count();
        let period_ms = self.period.as_millis() as f64;
        SpeedReport {
            rate_per_minute: count as f64 * 60_000.0 / period_ms,
        }
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED_PERIOD)
    }
}
