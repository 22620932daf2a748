//! Subscriber sinks and handles.

use crate::registry::RegistryCommand;
use bookcast_core::{BookEvent, Symbol};
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Registry-unique subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Why a subscriber was removed by its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// Sink full when a stateful event had to be delivered.
    Overflow,
    /// Receiver dropped.
    Closed,
}

impl EvictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overflow => "overflow",
            Self::Closed => "closed",
        }
    }
}

/// Result of a non-blocking delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Non-stateful event dropped on a full sink.
    Skipped,
    Evict(EvictReason),
}

/// Bounded event sink owned by a symbol worker.
///
/// Delivery never blocks. A subscriber that cannot keep up with
/// snapshots and updates is evicted rather than silently desynced.
#[derive(Debug, Clone)]
pub struct SubscriberSink {
    tx: mpsc::Sender<BookEvent>,
}

impl SubscriberSink {
    pub fn new(tx: mpsc::Sender<BookEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink and its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BookEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn deliver(&self, event: &BookEvent) -> Delivery {
        match self.tx.try_send(event.clone()) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) if !event.is_stateful() => Delivery::Skipped,
            Err(TrySendError::Full(_)) => Delivery::Evict(EvictReason::Overflow),
            Err(TrySendError::Closed(_)) => Delivery::Evict(EvictReason::Closed),
        }
    }
}

/// Cancellation handle returned by `subscribe`.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    symbol: Symbol,
    registry_tx: mpsc::UnboundedSender<RegistryCommand>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: SubscriptionId,
        symbol: Symbol,
        registry_tx: mpsc::UnboundedSender<RegistryCommand>,
    ) -> Self {
        Self {
            id,
            symbol,
            registry_tx,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Cancel the subscription. Idempotent and non-blocking; takes
    /// effect for the next emitted event at the latest.
    pub fn cancel(&self) {
        let _ = self
            .registry_tx
            .send(RegistryCommand::Cancel { id: self.id });
    }
}
