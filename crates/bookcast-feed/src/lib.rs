//! Feed normalization and order book replication for bookcast.
//!
//! Turns raw venue frames into canonical snapshot/delta events and
//! applies them to a per-symbol replica:
//! - `FeedNormalizer`: tagged decode of upstream frames
//! - `LevelMap`: per-side price → volume map
//! - `SequenceGuard`: wrap-around position counter
//! - `OrderBookReplica`: snapshot/delta application and depth views
//! - `ThroughputMeter`: sliding-window delta rate
//! - `BookMirror`: consumer-side replica with gap detection

pub mod error;
pub mod level_map;
pub mod mirror;
pub mod normalizer;
pub mod replica;
pub mod sequence;
pub mod throughput;

pub use error::{FeedError, FeedResult};
pub use level_map::{LevelChange, LevelMap};
pub use mirror::{BookMirror, MirrorStatus};
pub use normalizer::{BookDelta, BookSnapshot, ControlEvent, FeedNormalizer, NormalizedEvent};
pub use replica::{OrderBookReplica, ReplicaState, DEFAULT_VIEW_DEPTH};
pub use sequence::{SequenceGuard, DEFAULT_SEQUENCE_RANGE};
pub use throughput::{ThroughputMeter, DEFAULT_SPEED_PERIOD};
