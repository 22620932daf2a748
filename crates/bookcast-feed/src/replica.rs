//! Per-symbol order book replica.
//!
//! State machine `Uninitialized → Initialized`. The first applied
//! snapshot initializes the replica; it never goes back. Transport
//! failure is handled by replacing the replica with a fresh one.

use crate::level_map::{LevelChange, LevelMap};
use crate::normalizer::BookSnapshot;
use crate::sequence::SequenceGuard;
use bookcast_core::{BookUpdate, BookView, PriceLevel, Side, Symbol};
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

/// Default number of levels per side in a view.
pub const DEFAULT_VIEW_DEPTH: usize = 10;

/// Replica lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaState {
    Uninitialized,
    Initialized,
}

/// Authoritative in-memory book for one symbol.
#[derive(Debug)]
pub struct OrderBookReplica {
    symbol: Symbol,
    asks: LevelMap,
    bids: LevelMap,
    depth: usize,
    guard: SequenceGuard,
    sequence: u64,
    state: ReplicaState,
    /// Deltas discarded because no snapshot had been applied yet.
    dropped_deltas: u64,
    /// Wall time of the last applied snapshot or delta.
    last_update: Option<DateTime<Utc>>,
}

impl OrderBookReplica {
    /// Create an empty, uninitialized replica.
    pub fn new(symbol: Symbol, depth: usize, guard: SequenceGuard) -> Self {
        Self {
            symbol,
            asks: LevelMap::new(Side::Ask),
            bids: LevelMap::new(Side::Bid),
            depth,
            guard,
            sequence: 0,
            state: ReplicaState::Uninitialized,
            dropped_deltas: 0,
            last_update: None,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn state(&self) -> ReplicaState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ReplicaState::Initialized
    }

    /// Current position of the sequence counter.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn dropped_deltas(&self) -> u64 {
        self.dropped_deltas
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Replace both sides wholesale and initialize.
    ///
    /// Does not advance the sequence; the returned view carries the
    /// current position so consumers can anchor on it.
    pub fn apply_snapshot(&mut self, snapshot: &BookSnapshot) -> BookView {
        self.asks.replace(snapshot.asks.iter().copied());
        self.bids.replace(snapshot.bids.iter().copied());
        self.state = ReplicaState::Initialized;
        self.last_update = Some(Utc::now());

        debug!(
            symbol = %self.symbol,
            asks = self.asks.len(),
            bids = self.bids.len(),
            sequence = self.sequence,
            "Snapshot applied"
        );
        self.view()
    }

    /// Apply one side's level changes.
    ///
    /// Returns `None` (and counts the drop) while uninitialized. Otherwise
    /// advances the sequence by exactly one and returns the update with
    /// no-op deletions filtered out.
    pub fn apply_delta(&mut self, side: Side, levels: &[PriceLevel]) -> Option<BookUpdate> {
        if !self.is_initialized() {
            self.dropped_deltas += 1;
            trace!(symbol = %self.symbol, %side, "Delta before snapshot dropped");
            return None;
        }

        let map = match side {
            Side::Ask => &mut self.asks,
            Side::Bid => &mut self.bids,
        };
        let changed: Vec<PriceLevel> = levels
            .iter()
            .copied()
            .filter(|level| map.apply(*level) != LevelChange::Unchanged)
            .collect();

        self.sequence = self.guard.next(self.sequence);
        self.last_update = Some(Utc::now());

        Some(BookUpdate::for_side(side, changed, self.sequence))
    }

    /// Depth-limited view: asks ascending, bids descending.
    pub fn build_view(&self, depth: usize) -> BookView {
        BookView {
            asks: self.asks.top(depth),
            bids: self.bids.top(depth),
            sequence: self.sequence,
        }
    }

    /// View at the configured depth.
    pub fn view(&self) -> BookView {
        self.build_view(self.depth)
    }
}
