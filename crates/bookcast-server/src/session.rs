//! Per-client socket session.
//!
//! One reader loop parses requests, one writer task drains the outbound
//! queue, and each subscription gets a forwarder task that copies book
//! events from its registry sink into that queue. A full queue blocks the
//! forwarders, which lets the sink fill up and the registry evict the
//! subscription instead of buffering without bound.

use crate::types::{ClientRequest, ServerMessage};
use axum::extract::ws::{Message, WebSocket};
use bookcast_core::{BookEvent, Symbol};
use bookcast_registry::{RegistryHandle, SubscriptionHandle};
use bookcast_telemetry::Metrics;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ActiveSubscription {
    handle: SubscriptionHandle,
    forwarder: JoinHandle<()>,
}

pub(crate) struct ClientSession {
    peer: String,
    registry: RegistryHandle,
    outbound: mpsc::Sender<ServerMessage>,
    subscriptions: HashMap<Symbol, ActiveSubscription>,
}

impl ClientSession {
    /// Drive `socket` until the client goes away, then cancel everything
    /// it subscribed to.
    pub(crate) async fn run(
        socket: WebSocket,
        peer: String,
        registry: RegistryHandle,
        outbound_buffer: usize,
    ) {
        Metrics::client_connected();
        info!(%peer, "Client connected");

        let (mut sender, mut receiver) = socket.split();
        let (outbound, mut queue) = mpsc::channel::<ServerMessage>(outbound_buffer.max(1));

        let mut writer = tokio::spawn(async move {
            while let Some(msg) = queue.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, channel = msg.channel(), "Failed to encode message");
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            let _ = sender.close().await;
        });

        let mut session = Self {
            peer,
            registry,
            outbound,
            subscriptions: HashMap::new(),
        };

        loop {
            tokio::select! {
                frame = receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()).await,
                    Some(Ok(Message::Binary(_))) => {
                        session.reply(ServerMessage::error("binary frames are not supported")).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(peer = %session.peer, "Client closed socket");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(peer = %session.peer, error = %e, "Socket receive error");
                        break;
                    }
                },
                _ = &mut writer => {
                    debug!(peer = %session.peer, "Writer finished, closing session");
                    break;
                }
            }
        }

        session.close();
        writer.abort();
        Metrics::client_disconnected();
    }

    async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientRequest>(text) {
            Ok(ClientRequest::Subscribe { symbol }) => self.subscribe(symbol).await,
            Ok(ClientRequest::Unsubscribe { symbol }) => self.unsubscribe(symbol).await,
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "Malformed request");
                self.reply(ServerMessage::error(format!("malformed request: {e}")))
                    .await;
            }
        }
    }

    /// Trim the requested symbol; blank symbols get an error reply.
    async fn checked_symbol(&self, symbol: Symbol) -> Option<Symbol> {
        match symbol.as_str().parse::<Symbol>() {
            Ok(symbol) => Some(symbol),
            Err(e) => {
                self.reply(ServerMessage::error(e.to_string())).await;
                None
            }
        }
    }

    async fn subscribe(&mut self, symbol: Symbol) {
        let Some(symbol) = self.checked_symbol(symbol).await else {
            return;
        };

        // A subscription ended server-side leaves a finished forwarder
        if self
            .subscriptions
            .get(&symbol)
            .is_some_and(|active| active.forwarder.is_finished())
        {
            self.subscriptions.remove(&symbol);
        }
        if self.subscriptions.contains_key(&symbol) {
            self.reply(ServerMessage::error(format!("already subscribed to {symbol}")))
                .await;
            return;
        }

        match self.registry.subscribe_channel(symbol.clone()).await {
            Ok((handle, events)) => {
                info!(peer = %self.peer, %symbol, id = %handle.id(), "Client subscribed");
                let forwarder = tokio::spawn(forward(symbol.clone(), events, self.outbound.clone()));
                self.subscriptions
                    .insert(symbol, ActiveSubscription { handle, forwarder });
            }
            Err(e) => {
                warn!(peer = %self.peer, %symbol, error = %e, "Subscribe failed");
                self.reply(ServerMessage::error(e.to_string())).await;
            }
        }
    }

    async fn unsubscribe(&mut self, symbol: Symbol) {
        let Some(symbol) = self.checked_symbol(symbol).await else {
            return;
        };
        match self.subscriptions.remove(&symbol) {
            Some(active) => {
                info!(peer = %self.peer, %symbol, "Client unsubscribed");
                active.handle.cancel();
                active.forwarder.abort();
            }
            None => {
                self.reply(ServerMessage::error(format!("not subscribed to {symbol}")))
                    .await;
            }
        }
    }

    async fn reply(&self, msg: ServerMessage) {
        let _ = self.outbound.send(msg).await;
    }

    fn close(&mut self) {
        let count = self.subscriptions.len();
        for (_, active) in self.subscriptions.drain() {
            active.handle.cancel();
            active.forwarder.abort();
        }
        info!(peer = %self.peer, subscriptions = count, "Client disconnected");
    }
}

async fn forward(
    symbol: Symbol,
    mut events: mpsc::Receiver<BookEvent>,
    outbound: mpsc::Sender<ServerMessage>,
) {
    while let Some(event) = events.recv().await {
        if outbound
            .send(ServerMessage::from_event(&symbol, event))
            .await
            .is_err()
        {
            return;
        }
    }
    debug!(%symbol, "Subscription ended by server");
    let _ = outbound.send(ServerMessage::Closed { symbol }).await;
}
