//! bookcast - Kraken order book replicator with subscriber fan-out.
//!
//! Main application that wires together:
//! - Upstream book feed connections (one per subscribed symbol)
//! - The subscription registry and its per-symbol book workers
//! - The downstream HTTP/WebSocket server

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::{AppConfig, FeedConfig, TelemetryConfig};
pub use error::{AppError, AppResult};
