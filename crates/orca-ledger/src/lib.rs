//! Orca Orchestration Ledger
//!
//! The metadata envelope attached to every entity and event, and the only
//! functions allowed to write its orchestration facets:
//! - `envelope`: typed `Metadata` / `ServiceSpecific` / `DomainSection`
//! - `ledger`: trace and state primitives plus cross-service helpers
//! - `pipeline`: best-effort stages run after a primary mutation
//! - `stages`: cache, schedule, graph enrichment and registration stages

pub mod clients;
pub mod envelope;
pub mod event;
pub mod ledger;
pub mod pipeline;
pub mod stages;

pub use clients::{GraphClient, GraphUpdate, Registration, ServiceRegistrar};
pub use envelope::{DomainSection, Metadata, ServiceSpecific};
pub use event::{details, OrchestrationEvent};
pub use ledger::{
    automate_orchestration, automate_orchestration_with_user, current_state, extract_schedule, extract_trace,
    log_cross_service_event, record_event, record_performance_metric, update_state, update_state_machine,
};
pub use pipeline::{
    BestEffortPipeline, Diagnostics, DiagnosticsSink, PipelineReport, Stage, StageContext, StageFailure,
    StageOutcome,
};

use orca_common::OrcaError;
use orca_scheduler::SchedulerError;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The envelope was never initialised. Callers must create it with
    /// `Metadata::new()` or `automate_orchestration` first.
    #[error("metadata envelope has no service_specific section")]
    MissingServiceSpecific,

    #[error("'{key}' is reserved for orchestration")]
    ReservedKey { key: String },

    #[error("No schedule: {0}")]
    NoSchedule(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] OrcaError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Collaborator error: {0}")]
    Collaborator(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
