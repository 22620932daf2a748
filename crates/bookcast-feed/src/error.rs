//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Unrecognized format: {0}")]
    UnrecognizedFormat(String),

    #[error("Invalid level: {0}")]
    InvalidLevel(String),

    #[error("Symbol mismatch: expected {expected}, received {received}")]
    SymbolMismatch { expected: String, received: String },

    #[error("Subscription rejected for {symbol}: {reason}")]
    SubscriptionRejected { symbol: String, reason: String },

    #[error("Sequence gap: expected {expected}, received {received}")]
    SequenceGap { expected: u64, received: u64 },
}

impl FeedError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnrecognizedFormat(_) => "unrecognized_format",
            Self::InvalidLevel(_) => "invalid_level",
            Self::SymbolMismatch { .. } => "symbol_mismatch",
            Self::SubscriptionRejected { .. } => "subscription_rejected",
            Self::SequenceGap { .. } => "sequence_gap",
        }
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
