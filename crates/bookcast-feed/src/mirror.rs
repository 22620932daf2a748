//! Consumer-side book mirror.
//!
//! Rebuilds a book from the `snapshot`/`update` event stream and detects
//! missed updates by checking each sequence against the previous one.
//! On a gap the mirror stops applying updates until the next snapshot.

use crate::error::FeedResult;
use crate::level_map::LevelMap;
use crate::sequence::SequenceGuard;
use bookcast_core::{BookEvent, BookView, Side, SpeedReport};
use tracing::warn;

/// Outcome of feeding one event to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorStatus {
    Applied,
    /// Update ignored because the mirror has no valid snapshot.
    AwaitingSnapshot,
}

#[derive(Debug)]
pub struct BookMirror {
    asks: LevelMap,
    bids: LevelMap,
    guard: SequenceGuard,
    last_sequence: Option<u64>,
    speed: Option<SpeedReport>,
}

impl BookMirror {
    /// `guard` must use the producer's range.
    pub fn new(guard: SequenceGuard) -> Self {
        Self {
            asks: LevelMap::new(Side::Ask),
            bids: LevelMap::new(Side::Bid),
            guard,
            last_sequence: None,
            speed: None,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.last_sequence.is_some()
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Most recent speed report.
    pub fn speed(&self) -> Option<SpeedReport> {
        self.speed
    }

    /// Apply one event.
    ///
    /// Returns `SequenceGap` when an update does not follow the last
    /// known position; the mirror is then unsynced until a snapshot.
    pub fn apply(&mut self, event: &BookEvent) -> FeedResult<MirrorStatus> {
        match event {
            BookEvent::Snapshot(view) => {
                self.asks.replace(view.asks.iter().copied());
                self.bids.replace(view.bids.iter().copied());
                self.last_sequence = Some(view.sequence);
                Ok(MirrorStatus::Applied)
            }
            BookEvent::Update(update) => {
                let Some(last) = self.last_sequence else {
                    return Ok(MirrorStatus::AwaitingSnapshot);
                };
                if let Err(e) = self.guard.check(last, update.sequence) {
                    warn!(error = %e, "Book mirror out of sync");
                    self.last_sequence = None;
                    return Err(e);
                }
                for level in update.levels(Side::Ask) {
                    self.asks.apply(*level);
                }
                for level in update.levels(Side::Bid) {
                    self.bids.apply(*level);
                }
                self.last_sequence = Some(update.sequence);
                Ok(MirrorStatus::Applied)
            }
            BookEvent::Speed(report) => {
                self.speed = Some(*report);
                Ok(MirrorStatus::Applied)
            }
        }
    }

    /// Depth-limited view of the mirrored book.
    pub fn view(&self, depth: usize) -> BookView {
        BookView {
            asks: self.asks.top(depth),
            bids: self.bids.top(depth),
            sequence: self.last_sequence.unwrap_or_default(),
        }
    }
}

impl Default for BookMirror {
    fn default() -> Self {
        Self::new(SequenceGuard::default())
    }
}
