//! Main application orchestration.
//!
//! Wires the upstream connector, the subscription registry and the
//! downstream server together, and owns their shutdown order: server
//! first, then the registry (which stops every book worker and closes
//! the upstream sessions).

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use bookcast_core::{BookEvent, Symbol};
use bookcast_feed::{BookMirror, MirrorStatus, SequenceGuard};
use bookcast_registry::{RegistryHandle, SubscriptionRegistry};
use bookcast_server::{AppState, ServerError};
use bookcast_ws::{FeedConnector, WsConnector};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
    connector: Arc<dyn FeedConnector>,
}

impl Application {
    /// Create an application talking to the configured venue.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let connector = Arc::new(WsConnector::new(config.feed.clone().into()));
        Ok(Self { config, connector })
    }

    /// Create an application with a custom upstream connector.
    pub fn with_connector(config: AppConfig, connector: Arc<dyn FeedConnector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn start_registry(&self) -> (RegistryHandle, JoinHandle<()>) {
        info!(
            ws_url = %self.config.feed.ws_url,
            view_depth = self.config.book.view_depth,
            sequence_range = self.config.book.sequence_range,
            speed_period_ms = self.config.book.speed_period_ms,
            "Starting subscription registry"
        );
        SubscriptionRegistry::spawn(self.config.book.clone(), Arc::clone(&self.connector))
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn serve(self, shutdown: CancellationToken) -> AppResult<()> {
        let addr = self.config.server.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` fires.
    pub async fn serve_on(self, listener: TcpListener, shutdown: CancellationToken) -> AppResult<()> {
        let (registry, registry_task) = self.start_registry();
        let state = AppState::new(registry.clone(), self.config.server.clone())?;

        info!(addr = ?listener.local_addr().ok(), "Book server listening");
        let result = bookcast_server::serve(listener, state, shutdown).await;

        info!("Server stopped, shutting down registry");
        registry.shutdown();
        if let Err(e) = registry_task.await {
            warn!(error = %e, "Registry task ended abnormally");
        }

        result.map_err(AppError::from)
    }

    /// Follow one book and log what a downstream consumer would see.
    ///
    /// Events go through a `BookMirror`. On a sequence gap the watcher
    /// drops its subscription and subscribes again, which brings a fresh
    /// catch-up snapshot.
    pub async fn watch(self, symbol: Symbol, shutdown: CancellationToken) -> AppResult<()> {
        let (registry, registry_task) = self.start_registry();
        let (mut handle, mut events) = registry.subscribe_channel(symbol.clone()).await?;
        let guard = SequenceGuard::new(self.config.book.sequence_range);
        let mut mirror = BookMirror::new(guard);
        let depth = self.config.book.view_depth;

        info!(%symbol, id = %handle.id(), "Watching book");

        let outcome = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                event = events.recv() => match event {
                    Some(event) => {
                        if log_event(&symbol, &mut mirror, &event, depth) == Watch::Resync {
                            handle.cancel();
                            match registry.subscribe_channel(symbol.clone()).await {
                                Ok((next, rx)) => {
                                    info!(%symbol, id = %next.id(), "Resubscribed after gap");
                                    handle = next;
                                    events = rx;
                                    mirror = BookMirror::new(guard);
                                }
                                Err(e) => break Err(e.into()),
                            }
                        }
                    }
                    None => break Err(AppError::StreamEnded(symbol.to_string())),
                },
            }
        };

        handle.cancel();
        registry.shutdown();
        if let Err(e) = registry_task.await {
            warn!(error = %e, "Registry task ended abnormally");
        }
        outcome
    }
}

/// What the watcher should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Watch {
    Continue,
    Resync,
}

fn log_event(symbol: &Symbol, mirror: &mut BookMirror, event: &BookEvent, depth: usize) -> Watch {
    match mirror.apply(event) {
        Ok(MirrorStatus::Applied) => {}
        Ok(MirrorStatus::AwaitingSnapshot) => {
            debug!(%symbol, kind = event.kind(), "Waiting for snapshot");
            return Watch::Continue;
        }
        Err(e) => {
            warn!(%symbol, error = %e, "Book stream out of sequence, resubscribing");
            return Watch::Resync;
        }
    }

    let view = mirror.view(depth);
    let best_bid = view.best_bid().map(|l| l.price.to_string());
    let best_ask = view.best_ask().map(|l| l.price.to_string());

    match event {
        BookEvent::Snapshot(_) => info!(
            %symbol,
            sequence = view.sequence,
            bids = view.bids.len(),
            asks = view.asks.len(),
            best_bid = ?best_bid,
            best_ask = ?best_ask,
            "Snapshot"
        ),
        BookEvent::Update(update) => debug!(
            %symbol,
            sequence = update.sequence,
            best_bid = ?best_bid,
            best_ask = ?best_ask,
            "Update"
        ),
        BookEvent::Speed(report) => info!(
            %symbol,
            rate_per_minute = report.rate_per_minute,
            best_bid = ?best_bid,
            best_ask = ?best_ask,
            "Speed"
        ),
    }
    Watch::Continue
}
