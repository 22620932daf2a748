//! Subscription registry service.
//!
//! A single task owns the symbol → entry map. Entries are created lazily
//! on the first subscribe and torn down when their last subscriber goes
//! away, which drops the worker's feed link and closes the upstream
//! connection.

use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::sink::{SubscriberSink, SubscriptionHandle, SubscriptionId};
use crate::worker::{SymbolWorker, WorkerCommand};
use bookcast_core::{BookEvent, Symbol};
use bookcast_telemetry::Metrics;
use bookcast_ws::FeedConnector;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Commands accepted by the registry service.
pub(crate) enum RegistryCommand {
    Subscribe {
        symbol: Symbol,
        sink: SubscriberSink,
        reply: oneshot::Sender<RegistryResult<SubscriptionHandle>>,
    },
    Cancel {
        id: SubscriptionId,
    },
    Evicted {
        id: SubscriptionId,
    },
    WorkerExited {
        symbol: Symbol,
        generation: u64,
    },
    Stats {
        reply: oneshot::Sender<RegistryStats>,
    },
    Shutdown,
}

/// Live symbol and its subscriber count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolStats {
    pub symbol: Symbol,
    pub subscribers: usize,
}

/// Snapshot of the registry's bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub symbols: Vec<SymbolStats>,
}

impl RegistryStats {
    pub fn total_subscribers(&self) -> usize {
        self.symbols.iter().map(|s| s.subscribers).sum()
    }

    pub fn subscribers_for(&self, symbol: &Symbol) -> usize {
        self.symbols
            .iter()
            .find(|s| &s.symbol == symbol)
            .map(|s| s.subscribers)
            .unwrap_or(0)
    }
}

struct SymbolEntry {
    generation: u64,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    cancel: CancellationToken,
    subscribers: HashSet<SubscriptionId>,
}

/// Cloneable access to the registry service.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    tx: mpsc::UnboundedSender<RegistryCommand>,
    sink_capacity: usize,
}

impl RegistryHandle {
    /// Subscribe `sink` to `symbol`.
    ///
    /// Returns once the symbol's worker has registered the sink. If the
    /// book is already initialized, the sink holds a catch-up snapshot
    /// by then, ahead of any live event.
    pub async fn subscribe(
        &self,
        symbol: Symbol,
        sink: SubscriberSink,
    ) -> RegistryResult<SubscriptionHandle> {
        let (reply, rx) = oneshot::channel();
        let name = symbol.to_string();
        self.tx
            .send(RegistryCommand::Subscribe {
                symbol,
                sink,
                reply,
            })
            .map_err(|_| RegistryError::Closed)?;
        rx.await
            .map_err(|_| RegistryError::WorkerUnavailable(name))?
    }

    /// Subscribe with a fresh sink of the configured capacity.
    pub async fn subscribe_channel(
        &self,
        symbol: Symbol,
    ) -> RegistryResult<(SubscriptionHandle, mpsc::Receiver<BookEvent>)> {
        let (sink, rx) = SubscriberSink::channel(self.sink_capacity);
        let handle = self.subscribe(symbol, sink).await?;
        Ok((handle, rx))
    }

    /// Cancel by handle. Idempotent and non-blocking.
    pub fn cancel(&self, handle: &SubscriptionHandle) {
        let _ = self.tx.send(RegistryCommand::Cancel { id: handle.id() });
    }

    pub async fn stats(&self) -> RegistryResult<RegistryStats> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Stats { reply })
            .map_err(|_| RegistryError::Closed)?;
        rx.await.map_err(|_| RegistryError::Closed)
    }

    /// Stop every worker and the service itself.
    pub fn shutdown(&self) {
        let _ = self.tx.send(RegistryCommand::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Registry service state. Lives on its own task until `shutdown`;
/// see `spawn`.
pub struct SubscriptionRegistry {
    config: RegistryConfig,
    connector: Arc<dyn FeedConnector>,
    entries: HashMap<Symbol, SymbolEntry>,
    owners: HashMap<SubscriptionId, Symbol>,
    next_id: u64,
    next_generation: u64,
    tx: mpsc::UnboundedSender<RegistryCommand>,
    rx: mpsc::UnboundedReceiver<RegistryCommand>,
}

impl SubscriptionRegistry {
    /// Start the registry service task.
    pub fn spawn(
        config: RegistryConfig,
        connector: Arc<dyn FeedConnector>,
    ) -> (RegistryHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = RegistryHandle {
            tx: tx.clone(),
            sink_capacity: config.sink_capacity,
        };
        let registry = Self {
            config,
            connector,
            entries: HashMap::new(),
            owners: HashMap::new(),
            next_id: 1,
            next_generation: 1,
            tx,
            rx,
        };
        let task = tokio::spawn(registry.run());
        (handle, task)
    }

    async fn run(mut self) {
        info!("Subscription registry started");

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                RegistryCommand::Subscribe {
                    symbol,
                    sink,
                    reply,
                } => self.subscribe(symbol, sink, reply),
                RegistryCommand::Cancel { id } => self.remove_subscription(id, "cancelled"),
                RegistryCommand::Evicted { id } => self.remove_subscription(id, "evicted"),
                RegistryCommand::WorkerExited { symbol, generation } => {
                    self.worker_exited(symbol, generation)
                }
                RegistryCommand::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                RegistryCommand::Shutdown => break,
            }
        }

        for (symbol, entry) in self.entries.drain() {
            debug!(%symbol, "Stopping book worker");
            entry.cancel.cancel();
        }
        self.owners.clear();
        Metrics::active_books(0);
        info!("Subscription registry stopped");
    }

    fn subscribe(
        &mut self,
        symbol: Symbol,
        sink: SubscriberSink,
        reply: oneshot::Sender<RegistryResult<SubscriptionHandle>>,
    ) {
        let id = SubscriptionId::new(self.next_id);
        self.next_id += 1;
        let handle = SubscriptionHandle::new(id, symbol.clone(), self.tx.clone());

        let mut attach = WorkerCommand::Attach {
            handle,
            sink,
            reply,
        };

        // A worker may have exited without its notice being processed yet;
        // in that case the attach comes back and a new worker is started.
        for _ in 0..2 {
            self.ensure_entry(&symbol);
            let Some(entry) = self.entries.get_mut(&symbol) else {
                break;
            };
            match entry.commands.send(attach) {
                Ok(()) => {
                    entry.subscribers.insert(id);
                    let count = entry.subscribers.len();
                    self.owners.insert(id, symbol.clone());
                    Metrics::subscribers(symbol.as_str(), count);
                    debug!(%symbol, %id, subscribers = count, "Subscription registered");
                    return;
                }
                Err(mpsc::error::SendError(returned)) => {
                    warn!(%symbol, "Worker gone, starting a new one");
                    self.drop_entry(&symbol);
                    attach = returned;
                }
            }
        }

        if let WorkerCommand::Attach { reply, .. } = attach {
            let _ = reply.send(Err(RegistryError::WorkerUnavailable(symbol.to_string())));
        }
    }

    /// Lazily create the entry (and worker) for `symbol`.
    fn ensure_entry(&mut self, symbol: &Symbol) {
        if self.entries.contains_key(symbol) {
            return;
        }
        let entry = self.start_worker(symbol);
        self.entries.insert(symbol.clone(), entry);
        Metrics::active_books(self.entries.len());
    }

    fn start_worker(&mut self, symbol: &Symbol) -> SymbolEntry {
        let generation = self.next_generation;
        self.next_generation += 1;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let link = self.connector.connect(symbol);

        let worker = SymbolWorker::new(
            symbol.clone(),
            generation,
            self.config.clone(),
            link,
            commands_rx,
            self.tx.clone(),
            cancel.clone(),
        );
        tokio::spawn(worker.run());
        info!(%symbol, generation, "Book worker spawned");

        SymbolEntry {
            generation,
            commands: commands_tx,
            cancel,
            subscribers: HashSet::new(),
        }
    }

    fn remove_subscription(&mut self, id: SubscriptionId, why: &str) {
        let Some(symbol) = self.owners.remove(&id) else {
            return;
        };
        let Some(entry) = self.entries.get_mut(&symbol) else {
            return;
        };

        entry.subscribers.remove(&id);
        let remaining = entry.subscribers.len();
        debug!(%symbol, %id, why, remaining, "Subscription removed");
        Metrics::subscribers(symbol.as_str(), remaining);

        if remaining == 0 {
            info!(%symbol, "Last subscriber gone, tearing down book");
            self.drop_entry(&symbol);
        } else {
            let _ = entry.commands.send(WorkerCommand::Detach { id });
        }
    }

    fn worker_exited(&mut self, symbol: Symbol, generation: u64) {
        let current = self
            .entries
            .get(&symbol)
            .is_some_and(|entry| entry.generation == generation);
        if current {
            warn!(%symbol, generation, "Book worker exited on its own, dropping entry");
            self.drop_entry(&symbol);
        }
    }

    fn drop_entry(&mut self, symbol: &Symbol) {
        if let Some(entry) = self.entries.remove(symbol) {
            entry.cancel.cancel();
            for id in &entry.subscribers {
                self.owners.remove(id);
            }
            Metrics::subscribers(symbol.as_str(), 0);
        }
        Metrics::active_books(self.entries.len());
    }

    fn stats(&self) -> RegistryStats {
        let mut symbols: Vec<SymbolStats> = self
            .entries
            .iter()
            .map(|(symbol, entry)| SymbolStats {
                symbol: symbol.clone(),
                subscribers: entry.subscribers.len(),
            })
            .collect();
        symbols.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        RegistryStats { symbols }
    }
}
