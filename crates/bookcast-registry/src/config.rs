//! Registry configuration.

use bookcast_feed::{DEFAULT_SEQUENCE_RANGE, DEFAULT_VIEW_DEPTH};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-symbol book and fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Levels per side in snapshot views.
    #[serde(default = "default_view_depth")]
    pub view_depth: usize,
    /// Modulus of the update sequence counter.
    #[serde(default = "default_sequence_range")]
    pub sequence_range: u64,
    /// Speed reporting period in milliseconds.
    #[serde(default = "default_speed_period_ms")]
    pub speed_period_ms: u64,
    /// Events buffered per subscriber before it is evicted.
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
}

fn default_view_depth() -> usize {
    DEFAULT_VIEW_DEPTH
}

fn default_sequence_range() -> u64 {
    DEFAULT_SEQUENCE_RANGE
}

fn default_speed_period_ms() -> u64 {
    10_000
}

fn default_sink_capacity() -> usize {
    256
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            view_depth: default_view_depth(),
            sequence_range: default_sequence_range(),
            speed_period_ms: default_speed_period_ms(),
            sink_capacity: default_sink_capacity(),
        }
    }
}

impl RegistryConfig {
    pub fn speed_period(&self) -> Duration {
        Duration::from_millis(self.speed_period_ms.max(1))
    }
}
