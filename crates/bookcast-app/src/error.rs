//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(#[from] bookcast_registry::RegistryError),

    #[error("Server error: {0}")]
    Server(#[from] bookcast_server::ServerError),

    #[error("Book stream for {0} ended")]
    StreamEnded(String),
}

pub type AppResult<T> = Result<T, AppError>;
