//! Core domain types for bookcast.
//!
//! This crate provides fundamental types used throughout the replicator:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `Symbol`, `Side`, `PriceLevel`: Order book identifiers and levels
//! - `BookEvent`: Events fanned out to subscribers (snapshot/update/speed)

pub mod decimal;
pub mod error;
pub mod types;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use types::{BookEvent, BookUpdate, BookView, PriceLevel, Side, SpeedReport, Symbol};
