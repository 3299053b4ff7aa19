pub mod chunker;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{BackendError, Error, Result, StoreError};
