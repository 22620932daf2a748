//! Per-symbol feed link between a transport task and its consumer.
//!
//! The consumer holds a `FeedLink` (signal receiver + control); the
//! transport holds the matching `FeedEndpoint`. Dropping the link's
//! control shuts the transport down.

use crate::connection::{ConnectionConfig, FeedConnection};
use bookcast_core::Symbol;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Transport event delivered to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSignal {
    /// Session established and subscribe request sent.
    Opened,
    /// Raw text frame.
    Frame(String),
    /// Session ended; the transport may reconnect.
    Closed { reason: String },
}

/// Consumer-side control over a transport.
#[derive(Debug)]
pub struct FeedControl {
    shutdown: CancellationToken,
    restart: Arc<Notify>,
}

impl FeedControl {
    /// Drop the current session and open a fresh one.
    pub fn restart(&self) {
        self.restart.notify_one();
    }
}

impl Drop for FeedControl {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Consumer end of a feed.
#[derive(Debug)]
pub struct FeedLink {
    pub signals: mpsc::Receiver<FeedSignal>,
    pub control: FeedControl,
}

impl FeedLink {
    /// Create a connected link/endpoint pair.
    pub fn pair(capacity: usize) -> (FeedLink, FeedEndpoint) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shutdown = CancellationToken::new();
        let restart = Arc::new(Notify::new());

        let link = FeedLink {
            signals: rx,
            control: FeedControl {
                shutdown: shutdown.clone(),
                restart: restart.clone(),
            },
        };
        let endpoint = FeedEndpoint {
            signals: tx,
            shutdown,
            restart,
        };
        (link, endpoint)
    }

    /// Receive the next signal. `None` once the transport has stopped.
    pub async fn recv(&mut self) -> Option<FeedSignal> {
        self.signals.recv().await
    }
}

/// Transport end of a feed.
#[derive(Debug)]
pub struct FeedEndpoint {
    signals: mpsc::Sender<FeedSignal>,
    shutdown: CancellationToken,
    restart: Arc<Notify>,
}

impl FeedEndpoint {
    /// Deliver a signal. Returns `false` if the consumer is gone.
    pub async fn send(&self, signal: FeedSignal) -> bool {
        self.signals.send(signal).await.is_ok()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled() || self.signals.is_closed()
    }

    /// Resolves when the consumer requests shutdown.
    pub async fn shutdown_requested(&self) {
        self.shutdown.cancelled().await
    }

    /// Resolves when the consumer requests a restart.
    pub async fn restart_requested(&self) {
        self.restart.notified().await
    }
}

/// Source of per-symbol feed links.
pub trait FeedConnector: Send + Sync + 'static {
    /// Start a feed for `symbol`. Must be called within a tokio runtime.
    fn connect(&self, symbol: &Symbol) -> FeedLink;
}

/// Connector that opens one Kraken WebSocket per symbol.
#[derive(Debug, Clone)]
pub struct WsConnector {
    config: ConnectionConfig,
}

impl WsConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl FeedConnector for WsConnector {
    fn connect(&self, symbol: &Symbol) -> FeedLink {
        let (link, endpoint) = FeedLink::pair(self.config.signal_buffer);
        let connection = FeedConnection::new(self.config.clone(), symbol.clone(), endpoint);
        let symbol = symbol.clone();

        tokio::spawn(async move {
            match connection.run().await {
                Ok(()) => info!(%symbol, "Feed connection stopped"),
                Err(e) => error!(%symbol, error = %e, "Feed connection gave up"),
            }
        });
        link
    }
}
