//! Downstream socket protocol types.
//!
//! Clients send `{"method":"subscribe","symbol":"ETH/XBT"}` and
//! `{"method":"unsubscribe","symbol":"ETH/XBT"}`. Everything the server
//! pushes is tagged by `channel` and carries the symbol it belongs to.

use bookcast_core::{BookEvent, BookUpdate, BookView, SpeedReport, Symbol};
use serde::{Deserialize, Serialize};

/// Client → server request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ClientRequest {
    Subscribe { symbol: Symbol },
    Unsubscribe { symbol: Symbol },
}

/// Server → client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum ServerMessage {
    BookSnapshot { symbol: Symbol, data: BookView },
    BookUpdate { symbol: Symbol, data: BookUpdate },
    SpeedUpdate { symbol: Symbol, data: SpeedReport },
    /// Subscription ended on the server side (eviction, venue rejection).
    Closed { symbol: Symbol },
    Error { message: String },
}

impl ServerMessage {
    /// Wrap a book event for `symbol`.
    pub fn from_event(symbol: &Symbol, event: BookEvent) -> Self {
        let symbol = symbol.clone();
        match event {
            BookEvent::Snapshot(data) => Self::BookSnapshot { symbol, data },
            BookEvent::Update(data) => Self::BookUpdate { symbol, data },
            BookEvent::Speed(data) => Self::SpeedUpdate { symbol, data },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Channel name, for logs.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::BookSnapshot { .. } => "book_snapshot",
            Self::BookUpdate { .. } => "book_update",
            Self::SpeedUpdate { .. } => "speed_update",
            Self::Closed { .. } => "closed",
            Self::Error { .. } => "error",
        }
    }
}
