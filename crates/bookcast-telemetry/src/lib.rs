//! Prometheus metrics and structured logging for bookcast.
//!
//! - Prometheus metrics for feed health, replication and fan-out
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{gather_text, Metrics};
