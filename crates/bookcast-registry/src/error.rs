//! Registry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry is shut down")]
    Closed,

    #[error("Worker for {0} stopped before the subscription was attached")]
    WorkerUnavailable(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
