//! Order book identifiers, levels and the events fanned out to subscribers.
//!
//! Wire shapes:
//! - `snapshot`: `{"type":"snapshot","asks":[[px,vol],...],"bids":[[px,vol],...],"sequence":n}`
//! - `update`: `{"type":"update","asks":[[px,vol],...],"sequence":n}` (either side optional)
//! - `speed`: `{"type":"speed","ratePerMinute":r}`

use crate::error::CoreError;
use crate::{Price, Size};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Venue pair identifier (e.g., "ETH/XBT").
///
/// Opaque to the replicator: it is only compared for equality and used
/// as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = CoreError;

    /// Parse a client-supplied symbol, rejecting blank input.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidSymbol(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bid => write!(f, "bid"),
            Self::Ask => write!(f, "ask"),
        }
    }
}

/// A single quoted price and its aggregate volume.
///
/// Serialized as a `[price, volume]` pair of decimal strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(Price, Size)", into = "(Price, Size)")]
pub struct PriceLevel {
    pub price: Price,
    pub volume: Size,
}

impl PriceLevel {
    pub fn new(price: Price, volume: Size) -> Self {
        Self { price, volume }
    }

    /// Whether applying this level removes the price from the book.
    pub fn is_removal(&self) -> bool {
        !self.volume.is_positive()
    }
}

impl From<(Price, Size)> for PriceLevel {
    fn from((price, volume): (Price, Size)) -> Self {
        Self { price, volume }
    }
}

impl From<PriceLevel> for (Price, Size) {
    fn from(level: PriceLevel) -> Self {
        (level.price, level.volume)
    }
}

/// Depth-limited view of a replica.
///
/// Both sides are held best-first: asks ascending, bids descending.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookView {
    pub asks: Vec<PriceLevel>,
    pub bids: Vec<PriceLevel>,
    pub sequence: u64,
}

impl BookView {
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }
}

/// Changed levels from one applied delta.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asks: Option<Vec<PriceLevel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bids: Option<Vec<PriceLevel>>,
    pub sequence: u64,
}

impl BookUpdate {
    /// Build an update carrying `levels` on one side.
    ///
    /// An empty level list leaves both sides absent; the update still
    /// carries its sequence so consumers stay in lockstep.
    pub fn for_side(side: Side, levels: Vec<PriceLevel>, sequence: u64) -> Self {
        let levels = if levels.is_empty() { None } else { Some(levels) };
        match side {
            Side::Ask => Self {
                asks: levels,
                bids: None,
                sequence,
            },
            Side::Bid => Self {
                asks: None,
                bids: levels,
                sequence,
            },
        }
    }

    pub fn levels(&self, side: Side) -> &[PriceLevel] {
        let levels = match side {
            Side::Ask => &self.asks,
            Side::Bid => &self.bids,
        };
        levels.as_deref().unwrap_or(&[])
    }
}

/// Delta arrival rate extrapolated to one minute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedReport {
    #[serde(rename = "ratePerMinute")]
    pub rate_per_minute: f64,
}

/// Event delivered to a subscriber sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BookEvent {
    /// Full depth-limited view; anchors the consumer's sequence.
    Snapshot(BookView),
    /// Incremental change; sequence advanced by exactly one.
    Update(BookUpdate),
    /// Periodic throughput report.
    Speed(SpeedReport),
}

impl BookEvent {
    /// Event kind as used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::Update(_) => "update",
            Self::Speed(_) => "speed",
        }
    }

    /// Whether dropping this event would corrupt a consumer's book.
    pub fn is_stateful(&self) -> bool {
        !matches!(self, Self::Speed(_))
    }
}
