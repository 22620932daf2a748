//! Server error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Asset pairs request failed: {0}")]
    AssetPairsRequest(#[from] reqwest::Error),

    #[error("Asset pairs upstream error: {0}")]
    AssetPairsUpstream(String),
}

pub type ServerResult<T> = Result<T, ServerError>;
