//! Per-symbol worker task.
//!
//! Owns the replica, the subscriber sinks, the throughput meter and the
//! upstream feed link. Every mutation and every catch-up read happens
//! on this task, so subscribers observe events in exactly the order they
//! were applied.

use crate::config::RegistryConfig;
use crate::error::RegistryResult;
use crate::registry::RegistryCommand;
use crate::sink::{Delivery, EvictReason, SubscriberSink, SubscriptionHandle, SubscriptionId};
use bookcast_core::{BookEvent, Symbol};
use bookcast_feed::{
    FeedError, FeedNormalizer, NormalizedEvent, OrderBookReplica, SequenceGuard, ThroughputMeter,
};
use bookcast_telemetry::Metrics;
use bookcast_ws::{FeedLink, FeedSignal};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Commands from the registry service.
pub(crate) enum WorkerCommand {
    Attach {
        handle: SubscriptionHandle,
        sink: SubscriberSink,
        reply: oneshot::Sender<RegistryResult<SubscriptionHandle>>,
    },
    Detach {
        id: SubscriptionId,
    },
}

/// Why a worker loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    Cancelled,
    FeedEnded,
    Rejected(String),
    RegistryGone,
}

pub(crate) struct SymbolWorker {
    symbol: Symbol,
    generation: u64,
    config: RegistryConfig,
    normalizer: FeedNormalizer,
    replica: OrderBookReplica,
    meter: ThroughputMeter,
    sinks: HashMap<SubscriptionId, SubscriberSink>,
    link: FeedLink,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    registry_tx: mpsc::UnboundedSender<RegistryCommand>,
    cancel: CancellationToken,
    /// A restart was requested for the current feed session.
    restart_pending: bool,
}

impl SymbolWorker {
    pub(crate) fn new(
        symbol: Symbol,
        generation: u64,
        config: RegistryConfig,
        link: FeedLink,
        commands: mpsc::UnboundedReceiver<WorkerCommand>,
        registry_tx: mpsc::UnboundedSender<RegistryCommand>,
        cancel: CancellationToken,
    ) -> Self {
        let replica = fresh_replica(&symbol, &config);
        Self {
            normalizer: FeedNormalizer::new(symbol.clone()),
            meter: ThroughputMeter::new(config.speed_period()),
            replica,
            symbol,
            generation,
            config,
            sinks: HashMap::new(),
            link,
            commands,
            registry_tx,
            cancel,
            restart_pending: false,
        }
    }

    /// Run until cancelled, the feed stops for good, or the venue rejects
    /// the subscription. Reports its exit to the registry.
    pub(crate) async fn run(mut self) {
        info!(symbol = %self.symbol, generation = self.generation, "Book worker started");

        let period = self.config.speed_period();
        let mut speed = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        speed.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break WorkerExit::Cancelled,

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break WorkerExit::RegistryGone,
                },

                signal = self.link.recv() => match signal {
                    Some(signal) => {
                        if let Some(exit) = self.handle_signal(signal) {
                            break exit;
                        }
                    }
                    None => break WorkerExit::FeedEnded,
                },

                _ = speed.tick() => self.emit_speed(),
            }
        };

        match &exit {
            WorkerExit::Cancelled => {
                info!(symbol = %self.symbol, "Book worker stopped");
            }
            other => {
                warn!(symbol = %self.symbol, exit = ?other, subscribers = self.sinks.len(), "Book worker exited");
            }
        }

        Metrics::feed_connected(self.symbol.as_str(), false);
        let _ = self.registry_tx.send(RegistryCommand::WorkerExited {
            symbol: self.symbol.clone(),
            generation: self.generation,
        });
    }

    fn handle_command(&mut self, cmd: WorkerCommand) {
        match cmd {
            WorkerCommand::Attach {
                handle,
                sink,
                reply,
            } => self.attach(handle, sink, reply),
            WorkerCommand::Detach { id } => {
                if self.sinks.remove(&id).is_some() {
                    debug!(symbol = %self.symbol, %id, "Subscriber detached");
                }
            }
        }
    }

    /// Register a sink and push the catch-up snapshot before replying.
    fn attach(
        &mut self,
        handle: SubscriptionHandle,
        sink: SubscriberSink,
        reply: oneshot::Sender<RegistryResult<SubscriptionHandle>>,
    ) {
        let id = handle.id();

        if self.replica.is_initialized() {
            let catch_up = BookEvent::Snapshot(self.replica.view());
            if let Delivery::Evict(reason) = sink.deliver(&catch_up) {
                self.report_eviction(id, reason);
                let _ = reply.send(Ok(handle));
                return;
            }
        }

        self.sinks.insert(id, sink);
        debug!(
            symbol = %self.symbol,
            %id,
            initialized = self.replica.is_initialized(),
            subscribers = self.sinks.len(),
            "Subscriber attached"
        );

        if reply.send(Ok(handle)).is_err() {
            // Caller gave up waiting
            self.sinks.remove(&id);
            self.report_eviction(id, EvictReason::Closed);
        }
    }

    fn handle_signal(&mut self, signal: FeedSignal) -> Option<WorkerExit> {
        match signal {
            FeedSignal::Opened => {
                info!(symbol = %self.symbol, "Feed session opened");
                self.restart_pending = false;
                Metrics::feed_connected(self.symbol.as_str(), true);
                None
            }
            FeedSignal::Frame(text) => self.handle_frame(&text),
            FeedSignal::Closed { reason } => {
                warn!(
                    symbol = %self.symbol,
                    %reason,
                    last_update = ?self.replica.last_update(),
                    "Feed session closed, awaiting new snapshot"
                );
                Metrics::feed_connected(self.symbol.as_str(), false);
                Metrics::feed_reconnect(self.symbol.as_str());
                self.reset_replica();
                None
            }
        }
    }

    fn handle_frame(&mut self, text: &str) -> Option<WorkerExit> {
        let started = Instant::now();
        let symbol = self.symbol.clone();
        Metrics::frame_received(symbol.as_str());

        match self.normalizer.normalize(text) {
            Ok(NormalizedEvent::Snapshot(snapshot)) => {
                let view = self.replica.apply_snapshot(&snapshot);
                Metrics::snapshot_applied(symbol.as_str());
                self.broadcast(BookEvent::Snapshot(view));
            }
            Ok(NormalizedEvent::Deltas(deltas)) => {
                for delta in deltas {
                    match self.replica.apply_delta(delta.side, &delta.levels) {
                        Some(update) => {
                            self.meter.record(started);
                            Metrics::delta_applied(symbol.as_str());
                            self.broadcast(BookEvent::Update(update));
                        }
                        None => Metrics::delta_dropped(symbol.as_str()),
                    }
                }
            }
            Ok(NormalizedEvent::Control(control)) => {
                trace!(%symbol, ?control, "Control event");
            }
            Err(e @ FeedError::SymbolMismatch { .. }) => {
                Metrics::feed_error(symbol.as_str(), e.kind());
                if self.restart_pending {
                    // Frames still queued from the session being replaced
                    trace!(%symbol, error = %e, "Mismatch while restart pending");
                } else {
                    error!(%symbol, error = %e, "Feed corrupt, restarting session");
                    self.reset_replica();
                    self.restart_pending = true;
                    self.link.control.restart();
                }
            }
            Err(e @ FeedError::SubscriptionRejected { .. }) => {
                error!(%symbol, error = %e, "Venue rejected book subscription");
                Metrics::feed_error(symbol.as_str(), e.kind());
                return Some(WorkerExit::Rejected(e.to_string()));
            }
            Err(e) => {
                warn!(%symbol, error = %e, "Skipping frame");
                Metrics::feed_error(symbol.as_str(), e.kind());
            }
        }

        Metrics::frame_processed(symbol.as_str(), started.elapsed().as_secs_f64() * 1e6);
        None
    }

    fn emit_speed(&mut self) {
        let report = self.meter.tick(Instant::now());
        if !self.replica.is_initialized() {
            return;
        }
        Metrics::update_rate(self.symbol.as_str(), report.rate_per_minute);
        self.broadcast(BookEvent::Speed(report));
    }

    /// Deliver one event to every current subscriber in emission order.
    fn broadcast(&mut self, event: BookEvent) {
        let mut evicted = Vec::new();
        for (id, sink) in &self.sinks {
            match sink.deliver(&event) {
                Delivery::Delivered => {}
                Delivery::Skipped => trace!(symbol = %self.symbol, %id, kind = event.kind(), "Slow subscriber skipped event"),
                Delivery::Evict(reason) => evicted.push((*id, reason)),
            }
        }
        for (id, reason) in evicted {
            self.sinks.remove(&id);
            self.report_eviction(id, reason);
        }
    }

    fn report_eviction(&self, id: SubscriptionId, reason: EvictReason) {
        warn!(symbol = %self.symbol, %id, reason = reason.as_str(), "Subscriber evicted");
        Metrics::subscriber_evicted(self.symbol.as_str(), reason.as_str());
        let _ = self.registry_tx.send(RegistryCommand::Evicted { id });
    }

    fn reset_replica(&mut self) {
        let dropped = self.replica.dropped_deltas();
        if dropped > 0 {
            debug!(
                symbol = %self.symbol,
                dropped,
                last_update = ?self.replica.last_update(),
                "Discarding replica with pre-snapshot drops"
            );
        }
        self.replica = fresh_replica(&self.symbol, &self.config);
        self.meter.reset();
    }
}

fn fresh_replica(symbol: &Symbol, config: &RegistryConfig) -> OrderBookReplica {
    OrderBookReplica::new(
        symbol.clone(),
        config.view_depth,
        SequenceGuard::new(config.sequence_range),
    )
}
