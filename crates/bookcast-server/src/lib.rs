//! bookcast-server - Downstream HTTP/WebSocket surface.
//!
//! Routes:
//! - `GET /ws`: socket clients `subscribe`/`unsubscribe` to books by symbol
//! - `GET /asset_pairs`: venue pair listing passthrough
//! - `GET /healthcheck`: liveness probe, answers `OK`
//! - `GET /metrics`: Prometheus text exposition
//!
//! # Usage
//!
//! ```ignore
//! use bookcast_server::{run_server, ServerConfig};
//!
//! let shutdown = CancellationToken::new();
//! tokio::spawn(run_server(registry.clone(), ServerConfig::default(), shutdown.clone()));
//! ```

mod asset_pairs;
mod config;
mod error;
mod server;
mod session;
mod types;

pub use asset_pairs::AssetPairsClient;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{create_router, run_server, serve, AppState, ConnectionLimiter};
pub use types::{ClientRequest, ServerMessage};
