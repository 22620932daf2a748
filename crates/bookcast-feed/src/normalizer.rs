//! Upstream frame normalization.
//!
//! Decodes raw Kraken v1 book frames into canonical events before any
//! field is touched.
//!
//! Frame shapes:
//! 1. Snapshot: `[channelId, {"as":[...],"bs":[...]}, "book-10", "ETH/XBT"]`
//! 2. Update: `[channelId, {"a":[...]}|{"b":[...]}, "book-10", "ETH/XBT"]`
//!    or `[channelId, {"a":[...]}, {"b":[...],"c":"..."}, "book-10", "ETH/XBT"]`
//! 3. Control: `{"event":"heartbeat"}`, `{"event":"subscriptionStatus",...}`, ...
//!
//! Each level is `[price, volume, timestamp]` with an optional trailing
//! update-type marker (`"r"` for republish).

use crate::error::{FeedError, FeedResult};
use bookcast_core::{Price, PriceLevel, Side, Size, Symbol};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

/// Full replacement of both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSnapshot {
    pub asks: Vec<PriceLevel>,
    pub bids: Vec<PriceLevel>,
}

/// Level changes for one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDelta {
    pub side: Side,
    pub levels: Vec<PriceLevel>,
}

/// Object-shaped upstream message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Heartbeat,
    Pong,
    SystemStatus { status: String },
    Subscribed,
    Unsubscribed,
    /// Event kind this normalizer does not know. Logged and ignored.
    Unrecognized { event: String },
}

/// Result of normalizing one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEvent {
    Snapshot(BookSnapshot),
    /// One delta per side present, asks first.
    Deltas(Vec<BookDelta>),
    Control(ControlEvent),
}

/// Top-level frame: market data arrays or control objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFrame {
    Book(Vec<Value>),
    Control(RawControl),
}

#[derive(Debug, Deserialize)]
struct RawControl {
    event: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    pair: Option<String>,
    #[serde(default, rename = "errorMessage")]
    error_message: Option<String>,
}

/// Book payload object. Snapshot frames carry `as`/`bs`, update frames
/// carry `a`/`b` plus a checksum in `c`.
#[derive(Debug, Default, Deserialize)]
struct RawBookPayload {
    #[serde(default, rename = "as")]
    snapshot_asks: Option<Vec<Vec<Value>>>,
    #[serde(default, rename = "bs")]
    snapshot_bids: Option<Vec<Vec<Value>>>,
    #[serde(default, rename = "a")]
    asks: Option<Vec<Vec<Value>>>,
    #[serde(default, rename = "b")]
    bids: Option<Vec<Vec<Value>>>,
    #[serde(default, rename = "c")]
    checksum: Option<String>,
}

impl RawBookPayload {
    /// Fold a second payload object (two-sided update frames) into this one.
    fn absorb(&mut self, other: RawBookPayload) {
        self.snapshot_asks = self.snapshot_asks.take().or(other.snapshot_asks);
        self.snapshot_bids = self.snapshot_bids.take().or(other.snapshot_bids);
        self.asks = self.asks.take().or(other.asks);
        self.bids = self.bids.take().or(other.bids);
        self.checksum = self.checksum.take().or(other.checksum);
    }

    fn has_snapshot(&self) -> bool {
        self.snapshot_asks.is_some() || self.snapshot_bids.is_some()
    }

    fn has_update(&self) -> bool {
        self.asks.is_some() || self.bids.is_some()
    }
}

/// Normalizes frames for a single subscribed symbol.
#[derive(Debug, Clone)]
pub struct FeedNormalizer {
    expected: Symbol,
}

impl FeedNormalizer {
    /// Create a normalizer that accepts book frames for `expected` only.
    pub fn new(expected: Symbol) -> Self {
        Self { expected }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.expected
    }

    /// Normalize one raw text frame.
    pub fn normalize(&self, raw: &str) -> FeedResult<NormalizedEvent> {
        let frame: RawFrame = serde_json::from_str(raw).map_err(|e| {
            FeedError::UnrecognizedFormat(format!("undecodable frame: {e}"))
        })?;

        match frame {
            RawFrame::Book(items) => self.normalize_book(items),
            RawFrame::Control(control) => self.normalize_control(control),
        }
    }

    fn normalize_book(&self, mut items: Vec<Value>) -> FeedResult<NormalizedEvent> {
        if !(4..=5).contains(&items.len()) {
            return Err(FeedError::UnrecognizedFormat(format!(
                "book frame with {} elements",
                items.len()
            )));
        }

        let pair = match items.pop() {
            Some(Value::String(pair)) => pair,
            _ => {
                return Err(FeedError::UnrecognizedFormat(
                    "book frame without pair".to_string(),
                ))
            }
        };
        let channel = match items.pop() {
            Some(Value::String(channel)) => channel,
            _ => {
                return Err(FeedError::UnrecognizedFormat(
                    "book frame without channel name".to_string(),
                ))
            }
        };
        if !channel.starts_with("book") {
            return Err(FeedError::UnrecognizedFormat(format!(
                "unexpected channel: {channel}"
            )));
        }

        if pair != self.expected.as_str() {
            return Err(FeedError::SymbolMismatch {
                expected: self.expected.to_string(),
                received: pair,
            });
        }

        // items[0] is the channel id; the rest are payload objects
        let mut payload = RawBookPayload::default();
        for value in items.into_iter().skip(1) {
            let part: RawBookPayload = serde_json::from_value(value).map_err(|e| {
                FeedError::UnrecognizedFormat(format!("invalid book payload: {e}"))
            })?;
            payload.absorb(part);
        }

        match (payload.has_snapshot(), payload.has_update()) {
            (true, false) => {
                let asks = self.parse_levels(payload.snapshot_asks.unwrap_or_default())?;
                let bids = self.parse_levels(payload.snapshot_bids.unwrap_or_default())?;
                debug!(
                    symbol = %self.expected,
                    asks = asks.len(),
                    bids = bids.len(),
                    "Book snapshot"
                );
                Ok(NormalizedEvent::Snapshot(BookSnapshot { asks, bids }))
            }
            (false, true) => {
                let mut deltas = Vec::with_capacity(2);
                if let Some(asks) = payload.asks {
                    deltas.push(BookDelta {
                        side: Side::Ask,
                        levels: self.parse_levels(asks)?,
                    });
                }
                if let Some(bids) = payload.bids {
                    deltas.push(BookDelta {
                        side: Side::Bid,
                        levels: self.parse_levels(bids)?,
                    });
                }
                trace!(symbol = %self.expected, sides = deltas.len(), "Book delta");
                Ok(NormalizedEvent::Deltas(deltas))
            }
            (true, true) => Err(FeedError::UnrecognizedFormat(
                "book payload mixes snapshot and update fields".to_string(),
            )),
            (false, false) => Err(FeedError::UnrecognizedFormat(
                "book payload without levels".to_string(),
            )),
        }
    }

    fn normalize_control(&self, control: RawControl) -> FeedResult<NormalizedEvent> {
        let event = match control.event.as_str() {
            "heartbeat" => ControlEvent::Heartbeat,
            "pong" => ControlEvent::Pong,
            "systemStatus" => ControlEvent::SystemStatus {
                status: control.status.unwrap_or_default(),
            },
            "subscriptionStatus" => match control.status.as_deref() {
                Some("subscribed") => ControlEvent::Subscribed,
                Some("unsubscribed") => ControlEvent::Unsubscribed,
                Some("error") => {
                    return Err(FeedError::SubscriptionRejected {
                        symbol: control
                            .pair
                            .unwrap_or_else(|| self.expected.to_string()),
                        reason: control
                            .error_message
                            .unwrap_or_else(|| "unspecified".to_string()),
                    });
                }
                other => {
                    warn!(
                        symbol = %self.expected,
                        status = ?other,
                        "Unrecognized subscription status"
                    );
                    ControlEvent::Unrecognized {
                        event: control.event,
                    }
                }
            },
            _ => {
                warn!(symbol = %self.expected, event = %control.event, "Unrecognized control event");
                ControlEvent::Unrecognized {
                    event: control.event,
                }
            }
        };
        Ok(NormalizedEvent::Control(event))
    }

    fn parse_levels(&self, raw: Vec<Vec<Value>>) -> FeedResult<Vec<PriceLevel>> {
        raw.iter().map(|level| self.parse_level(level)).collect()
    }

    /// Parse `[price, volume, timestamp, marker?]`. Timestamp and marker
    /// are accepted but not retained.
    fn parse_level(&self, raw: &[Value]) -> FeedResult<PriceLevel> {
        if raw.len() < 2 {
            return Err(FeedError::InvalidLevel(format!(
                "level with {} elements",
                raw.len()
            )));
        }
        let price = self.parse_price(&raw[0])?;
        let volume = self.parse_size(&raw[1])?;
        Ok(PriceLevel::new(price, volume))
    }

    fn parse_price(&self, value: &Value) -> FeedResult<Price> {
        let d = parse_decimal(value)
            .ok_or_else(|| FeedError::InvalidLevel(format!("Invalid price: {value}")))?;
        let price = Price::new(d);
        if !price.is_positive() {
            return Err(FeedError::InvalidLevel(format!("Non-positive price: {value}")));
        }
        Ok(price)
    }

    fn parse_size(&self, value: &Value) -> FeedResult<Size> {
        let d = parse_decimal(value)
            .ok_or_else(|| FeedError::InvalidLevel(format!("Invalid volume: {value}")))?;
        Ok(Size::new(d))
    }
}

fn parse_decimal(value: &Value) -> Option<Decimal> {
    value.as_str().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn normalizer() -> FeedNormalizer {
        FeedNormalizer::new(Symbol::new("ETH/XBT"))
    }

    #[test]
    fn test_snapshot_frame() {
        let raw = r#"[336,{"as":[["101.0","3","1534614248.1"]],"bs":[["100.0","2","1534614248.2"]]},"book-10","ETH/XBT"]"#;

        match normalizer().normalize(raw).unwrap() {
            NormalizedEvent::Snapshot(snapshot) => {
                assert_eq!(snapshot.asks.len(), 1);
                assert_eq!(snapshot.asks[0].price, Price::new(dec!(101.0)));
                assert_eq!(snapshot.asks[0].volume, Size::new(dec!(3)));
                assert_eq!(snapshot.bids[0].price, Price::new(dec!(100.0)));
            }
            other => panic!("Expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn test_single_side_update_with_republish_marker() {
        let raw = r#"[336,{"b":[["100.0","0","1534614335.3","r"]],"c":"974942666"},"book-10","ETH/XBT"]"#;

        match normalizer().normalize(raw).unwrap() {
            NormalizedEvent::Deltas(deltas) => {
                assert_eq!(deltas.len(), 1);
                assert_eq!(deltas[0].side, Side::Bid);
                assert!(deltas[0].levels[0].is_removal());
            }
            other => panic!("Expected deltas, got {other:?}"),
        }
    }

    #[test]
    fn test_two_sided_update_yields_asks_first() {
        let raw = r#"[1234,{"a":[["5541.30000","2.50700000","1534614248.456738"]]},{"b":[["5541.20000","1.52900000","1534614248.765567"]],"c":"123"},"book-10","ETH/XBT"]"#;

        match normalizer().normalize(raw).unwrap() {
            NormalizedEvent::Deltas(deltas) => {
                let sides: Vec<Side> = deltas.iter().map(|d| d.side).collect();
                assert_eq!(sides, vec![Side::Ask, Side::Bid]);
                assert_eq!(deltas[0].levels[0].price.to_string(), "5541.30000");
            }
            other => panic!("Expected deltas, got {other:?}"),
        }
    }

    #[test]
    fn test_symbol_mismatch() {
        let raw = r#"[1,{"a":[["1.0","1","1"]]},"book-10","XBT/USD"]"#;

        match normalizer().normalize(raw) {
            Err(FeedError::SymbolMismatch { expected, received }) => {
                assert_eq!(expected, "ETH/XBT");
                assert_eq!(received, "XBT/USD");
            }
            other => panic!("Expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_control_events() {
        let n = normalizer();
        assert_eq!(
            n.normalize(r#"{"event":"heartbeat"}"#).unwrap(),
            NormalizedEvent::Control(ControlEvent::Heartbeat)
        );
        assert_eq!(
            n.normalize(r#"{"event":"systemStatus","status":"online","version":"1.0.0"}"#)
                .unwrap(),
            NormalizedEvent::Control(ControlEvent::SystemStatus {
                status: "online".to_string()
            })
        );
        assert_eq!(
            n.normalize(
                r#"{"channelID":10001,"event":"subscriptionStatus","pair":"ETH/XBT","status":"subscribed","subscription":{"name":"book","depth":10}}"#
            )
            .unwrap(),
            NormalizedEvent::Control(ControlEvent::Subscribed)
        );
    }

    #[test]
    fn test_unknown_control_event_is_not_an_error() {
        let event = normalizer().normalize(r#"{"event":"mystery"}"#).unwrap();
        assert_eq!(
            event,
            NormalizedEvent::Control(ControlEvent::Unrecognized {
                event: "mystery".to_string()
            })
        );
    }

    #[test]
    fn test_subscription_error_is_rejected() {
        let raw = r#"{"event":"subscriptionStatus","pair":"ETH/XBT","status":"error","errorMessage":"Currency pair not supported ETH/XBT"}"#;

        let err = normalizer().normalize(raw).unwrap_err();
        assert!(matches!(err, FeedError::SubscriptionRejected { .. }));
        assert_eq!(err.kind(), "subscription_rejected");
    }

    #[test]
    fn test_unrecognized_shapes() {
        let n = normalizer();
        assert!(matches!(
            n.normalize("not json"),
            Err(FeedError::UnrecognizedFormat(_))
        ));
        assert!(matches!(
            n.normalize(r#"{"no_event":true}"#),
            Err(FeedError::UnrecognizedFormat(_))
        ));
        assert!(matches!(
            n.normalize(r#"[1,{"x":[]},"book-10","ETH/XBT"]"#),
            Err(FeedError::UnrecognizedFormat(_))
        ));
        assert!(matches!(
            n.normalize(r#"[1,{"a":[]},"trade","ETH/XBT"]"#),
            Err(FeedError::UnrecognizedFormat(_))
        ));
        assert!(matches!(
            n.normalize(r#"[1,"ETH/XBT"]"#),
            Err(FeedError::UnrecognizedFormat(_))
        ));
    }

    #[test]
    fn test_invalid_level() {
        let n = normalizer();
        assert!(matches!(
            n.normalize(r#"[1,{"a":[["abc","1","1"]]},"book-10","ETH/XBT"]"#),
            Err(FeedError::InvalidLevel(_))
        ));
        assert!(matches!(
            n.normalize(r#"[1,{"a":[["1.0"]]},"book-10","ETH/XBT"]"#),
            Err(FeedError::InvalidLevel(_))
        ));
        assert!(matches!(
            n.normalize(r#"[1,{"b":[["0","1","1"]]},"book-10","ETH/XBT"]"#),
            Err(FeedError::InvalidLevel(_))
        ));
    }
}
