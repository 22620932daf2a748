//! Upstream Kraken WebSocket transport for bookcast.
//!
//! One `FeedConnection` per watched symbol:
//! - Sends the book subscribe request on every open
//! - Automatic reconnection with exponential backoff and jitter
//! - Stale-feed detection (app-level ping when idle, pong timeout)
//! - Signals (`Opened`, `Frame`, `Closed`) delivered over a bounded channel
//!
//! `FeedConnector` is the seam the registry uses to obtain a `FeedLink`
//! per symbol without knowing about sockets.

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod link;
pub mod message;

pub use connection::{ConnectionConfig, FeedConnection};
pub use error::{WsError, WsResult};
pub use heartbeat::HeartbeatMonitor;
pub use link::{FeedConnector, FeedControl, FeedEndpoint, FeedLink, FeedSignal, WsConnector};
pub use message::{BookSubscription, EventProbe, PingRequest, RequestEvent, SubscriptionRequest};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
