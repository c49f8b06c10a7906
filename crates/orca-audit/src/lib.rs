//! Orca Audit Trail
//!
//! Tamper-evident, strictly ordered log of security-relevant actions.
//!
//! - `entry`: audit records, canonical serialisation and the chain hash
//! - `chain`: replay verification over an ordered entry stream
//! - `store`: persistence contract with in-memory and Postgres backends
//! - `trail`: the append/verify entry point
//! - `security`: action catalogue and convenience logger for the security domain
//!
//! The chain is global per store: entries from unrelated actors interleave,
//! and every append is serialised behind a single lock.

pub mod chain;
pub mod entry;
pub mod security;
pub mod store;
pub mod trail;

pub use chain::{verify_chain, ChainReport};
pub use entry::{canonical_json, compute_entry_hash, AuditEntry, AuditRecord, GENESIS_PREV_HASH};
pub use security::{AuditAction, AuditResult, SecurityAuditor};
pub use store::{AuditStore, InMemoryAuditStore, PostgresAuditStore};
pub use trail::AuditTrail;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid audit record: {0}")]
    InvalidRecord(String),
}

pub type Result<T> = std::result::Result<T, AuditError>;

impl From<AuditError> for orca_common::OrcaError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::Database(e) => Self::Database(e.to_string()),
            AuditError::Serialization(e) => Self::Serialization(e),
            AuditError::InvalidRecord(msg) => Self::Config(msg),
        }
    }
}
