use std::time::Duration;
use thiserror::Error;

/// Faults raised by embedding/generation providers.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Auth, network or provider fault. `transient` marks faults worth
    /// retrying (rate limits, 5xx, dropped connections).
    #[error("Backend '{backend}' unavailable: {message}")]
    Unavailable { backend: String, message: String, transient: bool },

    #[error("Backend '{backend}' timed out after {elapsed:?}")]
    Timeout { backend: String, elapsed: Duration },

    #[error("Backend '{backend}' returned an invalid response: {message}")]
    InvalidResponse { backend: String, message: String },
}

impl BackendError {
    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable { backend: backend.into(), message: message.into(), transient: false }
    }

    pub fn transient(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable { backend: backend.into(), message: message.into(), transient: true }
    }

    pub fn timeout(backend: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout { backend: backend.into(), elapsed }
    }

    pub fn invalid_response(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse { backend: backend.into(), message: message.into() }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable { transient: true, .. })
    }

    /// Transient faults and timeouts; both are worth another try.
    pub fn is_retryable(&self) -> bool {
        self.is_transient() || matches!(self, BackendError::Timeout { .. })
    }
}

/// Faults raised by vector store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store is bound to embedder '{expected}' but got vectors from '{actual}'")]
    ModelMismatch { expected: String, actual: String },

    #[error("Store expects {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Chunk '{0}' is already indexed")]
    DuplicateChunk(String),

    #[error("Vector for chunk '{chunk_id}' belongs to '{actual}', not '{expected}'")]
    ForeignDocument { chunk_id: String, expected: String, actual: String },

    #[error("Storage operation failed: {0}")]
    Operation(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Index is not ready yet; try again shortly")]
    IndexNotReady,

    #[error("No indexed document matches the requested filter ({requested} ids)")]
    EmptyScope { requested: usize },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Unknown backend '{id}' for the {role} role")]
    UnknownBackend { id: String, role: &'static str },

    #[error("Failed to index document '{document_id}': {reason}")]
    Indexing { document_id: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether the caller may retry the same request unchanged after a delay.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::IndexNotReady => true,
            Error::Backend(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Text suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Error::IndexNotReady => "The paper index is still loading. Please try again shortly.".to_string(),
            Error::EmptyScope { .. } => "Nothing in the index matches the selected papers.".to_string(),
            Error::Backend(BackendError::Timeout { .. }) => "The model service took too long to respond.".to_string(),
            Error::Backend(_) => "The language model service is currently unavailable.".to_string(),
            Error::InvalidRequest(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_and_empty_scope_read_differently() {
        let not_ready = Error::IndexNotReady;
        let empty = Error::EmptyScope { requested: 2 };
        assert!(not_ready.is_retryable());
        assert!(!empty.is_retryable());
        assert_ne!(not_ready.user_message(), empty.user_message());
        assert!(not_ready.user_message().contains("try again"));
    }

    #[test]
    fn only_transient_backend_faults_are_transient() {
        assert!(BackendError::transient("gemini", "429").is_transient());
        assert!(!BackendError::unavailable("gemini", "401").is_transient());
        assert!(!BackendError::invalid_response("gemini", "no text").is_transient());
        assert!(BackendError::timeout("gemini", Duration::from_secs(1)).is_retryable());
        assert!(!BackendError::timeout("gemini", Duration::from_secs(1)).is_transient());
        assert!(!BackendError::unavailable("gemini", "401").is_retryable());
    }
}
