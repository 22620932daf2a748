//! Per-symbol feed connection.
//!
//! Handles connection lifecycle, automatic reconnection with exponential
//! backoff, and re-sending the book subscription on every new session.

use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatMonitor;
use crate::link::{FeedEndpoint, FeedSignal};
use crate::message::{EventProbe, PingRequest, SubscriptionRequest};
use bookcast_core::Symbol;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Book depth requested from the venue.
    pub book_depth: u32,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Upper bound of the random jitter added to each delay.
    pub reconnect_jitter_ms: u64,
    /// Handshake timeout.
    pub connect_timeout_ms: u64,
    /// Idle time before an app-level ping is sent.
    pub heartbeat_interval_ms: u64,
    /// Heartbeat timeout (a frame must arrive within this after a ping).
    pub heartbeat_timeout_ms: u64,
    /// Capacity of the signal channel towards the consumer.
    pub signal_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "wss://ws.kraken.com".to_string(),
            book_depth: 10,
            max_reconnect_attempts: 0, // Infinite
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 60000,
            reconnect_jitter_ms: 1000,
            connect_timeout_ms: 10000,
            heartbeat_interval_ms: 10000,
            heartbeat_timeout_ms: 5000,
            signal_buffer: 1024,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Transport task for one symbol's book feed.
pub struct FeedConnection {
    config: ConnectionConfig,
    symbol: Symbol,
    endpoint: FeedEndpoint,
    heartbeat: HeartbeatMonitor,
    state: ConnectionState,
}

impl FeedConnection {
    pub fn new(config: ConnectionConfig, symbol: Symbol, endpoint: FeedEndpoint) -> Self {
        let heartbeat =
            HeartbeatMonitor::new(config.heartbeat_interval_ms, config.heartbeat_timeout_ms);
        Self {
            config,
            symbol,
            endpoint,
            heartbeat,
            state: ConnectionState::Disconnected,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(symbol = %self.symbol, from = ?self.state, to = ?state, "Connection state changed");
            self.state = state;
        }
    }

    /// Run sessions until shutdown or until reconnect attempts are
    /// exhausted.
    pub async fn run(mut self) -> WsResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.endpoint.is_shutdown() {
                info!(symbol = %self.symbol, "Shutdown requested, exiting connect loop");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);

            let mut opened = false;
            let reason = match self.try_connect(&mut opened).await {
                Ok(()) => {
                    info!(symbol = %self.symbol, "Feed session closed");
                    "stream ended".to_string()
                }
                Err(WsError::RestartRequested) => {
                    info!(symbol = %self.symbol, "Feed session restarted on request");
                    WsError::RestartRequested.to_string()
                }
                Err(e) => {
                    error!(symbol = %self.symbol, error = %e, "Feed connection error");
                    e.to_string()
                }
            };

            if self.endpoint.is_shutdown() {
                info!(symbol = %self.symbol, "Shutdown requested after disconnect, not reconnecting");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            if opened {
                attempt = 0;
                if !self.endpoint.send(FeedSignal::Closed { reason }).await {
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            }

            attempt += 1;
            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(symbol = %self.symbol, attempt, "Max reconnection attempts reached");
                self.set_state(ConnectionState::Disconnected);
                return Err(WsError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            self.set_state(ConnectionState::Reconnecting);

            let delay = calculate_backoff_delay(&self.config, attempt);
            warn!(symbol = %self.symbol, attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.endpoint.shutdown_requested() => {
                    info!(symbol = %self.symbol, "Shutdown requested during backoff, exiting");
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            }
        }
    }

    /// One session. `opened` is set once the subscribe request went out.
    async fn try_connect(&mut self, opened: &mut bool) -> WsResult<()> {
        info!(url = %self.config.url, symbol = %self.symbol, "Connecting to feed");

        let connect = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            connect_async_tls_with_config(&self.config.url, None, true, None),
        );
        let (ws_stream, _response) = tokio::select! {
            result = connect => result
                .map_err(|_| WsError::ConnectionFailed("handshake timed out".to_string()))??,
            () = self.endpoint.shutdown_requested() => return Ok(()),
        };
        let (mut write, mut read) = ws_stream.split();

        let request = SubscriptionRequest::book(self.symbol.as_str(), self.config.book_depth);
        write
            .send(Message::Text(serde_json::to_string(&request)?))
            .await?;

        self.set_state(ConnectionState::Connected);
        *opened = true;
        info!(symbol = %self.symbol, depth = self.config.book_depth, "Feed connected, book subscription sent");

        if !self.endpoint.send(FeedSignal::Opened).await {
            close_gracefully(&mut write, Some(request.unsubscribe())).await;
            return Ok(());
        }

        self.heartbeat.reset();
        let mut check = tokio::time::interval(self.heartbeat.check_period());
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        check.tick().await;

        loop {
            tokio::select! {
                () = self.endpoint.shutdown_requested() => {
                    info!(symbol = %self.symbol, "Shutdown signal received in message loop");
                    close_gracefully(&mut write, Some(request.clone().unsubscribe())).await;
                    return Ok(());
                }

                () = self.endpoint.restart_requested() => {
                    close_gracefully(&mut write, None).await;
                    return Err(WsError::RestartRequested);
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.heartbeat.record_message();
                            if EventProbe::probe(&text).is_some_and(|p| p.is_pong()) {
                                self.heartbeat.record_pong();
                            }
                            if !self.endpoint.send(FeedSignal::Frame(text)).await {
                                debug!(symbol = %self.symbol, "Feed consumer dropped");
                                close_gracefully(&mut write, Some(request.clone().unsubscribe())).await;
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(symbol = %self.symbol, code, %reason, "Feed closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(symbol = %self.symbol, ?e, "Feed read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!(symbol = %self.symbol, "Feed stream ended");
                            return Ok(());
                        }
                        _ => {}
                    }
                }

                _ = check.tick() => {
                    if self.heartbeat.is_timed_out() {
                        error!(symbol = %self.symbol, "Heartbeat timeout");
                        return Err(WsError::HeartbeatTimeout);
                    }

                    if self.heartbeat.should_send_ping() {
                        let ping = serde_json::to_string(&PingRequest::new())?;
                        write.send(Message::Text(ping)).await?;
                        self.heartbeat.record_ping();
                        debug!(symbol = %self.symbol, "Sent heartbeat ping");
                    }
                }
            }
        }
    }
}

async fn close_gracefully(write: &mut WsWrite, farewell: Option<SubscriptionRequest>) {
    if let Some(request) = farewell {
        if let Ok(text) = serde_json::to_string(&request) {
            let _ = write.send(Message::Text(text)).await;
        }
    }
    if let Err(e) = write.send(Message::Close(None)).await {
        warn!(?e, "Failed to send Close frame");
    }
}

fn calculate_backoff_delay(config: &ConnectionConfig, attempt: u32) -> Duration {
    let base = config.reconnect_base_delay_ms;
    let max = config.reconnect_max_delay_ms;

    // base * 2^(attempt-1), exponent capped at 10
    let exponent = attempt.saturating_sub(1).min(10);
    let delay = base.saturating_mul(1u64 << exponent);
    let delay = delay.min(max);

    Duration::from_millis(delay + rand_jitter(config.reconnect_jitter_ms))
}

/// Generate random jitter in `0..bound_ms`.
fn rand_jitter(bound_ms: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    if bound_ms == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    nanos as u64 % bound_ms
}
