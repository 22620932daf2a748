//! Wrap-around position counter attached to every emitted update.
//!
//! `next = (current + 1) mod range`. Consumers use it to detect missed
//! deltas; beyond `range` consecutive misses the counter aliases and a
//! gap goes unnoticed.

use crate::error::{FeedError, FeedResult};

/// Default counter modulus.
pub const DEFAULT_SEQUENCE_RANGE: u64 = 100;

/// Computes and checks successive positions modulo `range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGuard {
    range: u64,
}

impl SequenceGuard {
    /// Create a guard. A range below 2 would make every position equal
    /// to its successor, so it is raised to 2.
    pub fn new(range: u64) -> Self {
        Self {
            range: range.max(2),
        }
    }

    pub fn range(&self) -> u64 {
        self.range
    }

    /// Position following `current`.
    #[inline]
    pub fn next(&self, current: u64) -> u64 {
        ((current % self.range) + 1) % self.range
    }

    /// Whether `received` directly follows `last`.
    #[inline]
    pub fn is_next(&self, last: u64, received: u64) -> bool {
        self.next(last) == received
    }

    /// Fail with `SequenceGap` if `received` does not follow `last`.
    pub fn check(&self, last: u64, received: u64) -> FeedResult<()> {
        let expected = self.next(last);
        if expected == received {
            Ok(())
        } else {
            Err(FeedError::SequenceGap { expected, received })
        }
    }
}

impl Default for SequenceGuard {
    fn default() -> Self {
        Self::new(DEFAULT_SEQUENCE_RANGE)
    }
}
