//! Outgoing Kraken WebSocket requests and a minimal incoming probe.

use serde::{Deserialize, Serialize};

/// Request event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestEvent {
    Subscribe,
    Unsubscribe,
}

/// Book channel parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookSubscription {
    pub name: String,
    pub depth: u32,
}

/// Subscribe/unsubscribe request.
///
/// Format: `{"event":"subscribe","pair":["ETH/XBT"],"subscription":{"name":"book","depth":10}}`
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRequest {
    pub event: RequestEvent,
    pub pair: Vec<String>,
    pub subscription: BookSubscription,
}

impl SubscriptionRequest {
    /// Subscribe to the book channel for one pair.
    pub fn book(symbol: &str, depth: u32) -> Self {
        Self {
            event: RequestEvent::Subscribe,
            pair: vec![symbol.to_string()],
            subscription: BookSubscription {
                name: "book".to_string(),
                depth,
            },
        }
    }

    /// Matching unsubscribe request.
    pub fn unsubscribe(mut self) -> Self {
        self.event = RequestEvent::Unsubscribe;
        self
    }
}

/// Application-level ping.
#[derive(Debug, Clone, Serialize)]
pub struct PingRequest {
    pub event: String,
}

impl PingRequest {
    pub fn new() -> Self {
        Self {
            event: "ping".to_string(),
        }
    }
}

impl Default for PingRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts only the `event` field of an object frame.
#[derive(Debug, Deserialize)]
pub struct EventProbe {
    pub event: String,
}

impl EventProbe {
    /// Probe a text frame. Array frames (market data) return `None`
    /// without attempting a decode.
    pub fn probe(text: &str) -> Option<Self> {
        if !text.trim_start().starts_with('{') {
            return None;
        }
        serde_json::from_str(text).ok()
    }

    pub fn is_pong(&self) -> bool {
        self.event == "pong"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_subscribe_request() {
        let req = SubscriptionRequest::book("ETH/XBT", 10);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "event": "subscribe",
                "pair": ["ETH/XBT"],
                "subscription": {"name": "book", "depth": 10}
            })
        );
    }

    #[test]
    fn test_unsubscribe_request() {
        let req = SubscriptionRequest::book("XBT/USD", 25).unsubscribe();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["event"], "unsubscribe");
        assert_eq!(json["subscription"]["depth"], 25);
    }

    #[test]
    fn test_ping_request() {
        assert_eq!(
            serde_json::to_string(&PingRequest::new()).unwrap(),
            r#"{"event":"ping"}"#
        );
    }

    #[test]
    fn test_event_probe() {
        assert!(EventProbe::probe(r#"{"event":"pong","reqid":7}"#)
            .unwrap()
            .is_pong());
        assert!(!EventProbe::probe(r#"{"event":"heartbeat"}"#)
            .unwrap()
            .is_pong());
        assert!(EventProbe::probe(r#"[1,{"a":[]},"book-10","ETH/XBT"]"#).is_none());
    }
}
