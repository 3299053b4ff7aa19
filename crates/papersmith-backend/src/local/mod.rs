//! Candle-backed models running in-process.
pub mod device;
pub mod embed;
pub mod generate;
pub mod pool;
pub mod tokenize;

use papersmith_core::error::BackendError;

pub(crate) fn join_error(backend: &str, err: tokio::task::JoinError) -> BackendError {
    BackendError::unavailable(backend, format!("inference task failed: {}", err))
}
