//! Per-symbol replica ownership and subscriber fan-out for bookcast.
//!
//! The registry service task owns a map of symbol entries. Each entry
//! runs a worker task holding the symbol's replica, its subscribers and
//! its upstream feed link. Subscribing is an awaited round-trip to the
//! worker (so the catch-up snapshot is in the sink before it returns);
//! cancelling is a fire-and-forget message.

pub mod config;
pub mod error;
pub mod registry;
pub mod sink;
mod worker;

pub use config::RegistryConfig;
pub use error::{RegistryError, RegistryResult};
pub use registry::{RegistryHandle, RegistryStats, SubscriptionRegistry, SymbolStats};
pub use sink::{Delivery, EvictReason, SubscriberSink, SubscriptionHandle, SubscriptionId};
