//! Orca Common
//!
//! Shared building blocks for every Orca crate:
//! - `OrcaError`: the workspace-wide error type
//! - `logging`: tracing subscriber initialisation
//! - `cache`: TTL key-value cache contract (in-memory and Redis)
//! - `resolver`: type-keyed dependency container used by orchestration helpers

pub mod cache;
pub mod logging;
pub mod resolver;

pub use cache::{Cache, InMemoryCache, RedisCache};
pub use resolver::Container;

// ============================================================================
// Lifecycle States
// ============================================================================

/// Event lifecycle state that triggers handler execution.
pub const STATE_REQUESTED: &str = "requested";
pub const STATE_STARTED: &str = "started";
pub const STATE_SUCCESS: &str = "success";
pub const STATE_FAILED: &str = "failed";
pub const STATE_COMPLETED: &str = "completed";

/// Orchestration states written into a metadata envelope.
pub mod orchestration_state {
    pub const PENDING: &str = "pending";
    pub const RUNNING: &str = "running";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
    pub const CROSS_SERVICE: &str = "cross-service";
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrcaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No instance registered for {type_name}")]
    NotRegistered { type_name: &'static str },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Event bus error: {0}")]
    Bus(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Shutdown in progress")]
    ShutdownInProgress,
}

impl OrcaError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Configuration errors are never retried.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, OrcaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_is_not_transient() {
        let err = OrcaError::config("invalid trigger");
        assert!(err.is_config());
        assert_eq!(err.to_string(), "Configuration error: invalid trigger");
        assert!(!OrcaError::Cache("timeout".into()).is_config());
    }
}
