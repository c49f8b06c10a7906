//! Orca Scheduler
//!
//! Job model and persistence plus the CDC trigger bridge:
//! - `Job` / `JobRun`: scheduled work and its immutable execution records
//! - `JobRepository`: CRUD, pagination and run recording (Postgres, in-memory)
//! - `SchedulerClient`: the narrow submit interface orchestration helpers use
//! - `cdc`: LISTEN/NOTIFY bridge turning `master` row changes into handler calls

pub mod cdc;
pub mod client;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use cdc::{CdcBridge, CdcHandler, CdcJobDeriver, CdcSubscription, CdcTrigger, ReconnectPolicy};
pub use client::SchedulerClient;
pub use memory::InMemoryJobRepository;
pub use postgres::PostgresJobRepository;
pub use repository::{JobRepository, Page, Pagination};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Job Model
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Paused,
    Disabled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Cron,
    Cdc,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Custom,
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = SchedulerError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    other => Err(SchedulerError::InvalidJob(format!(
                        "unknown {} '{}'", stringify!($ty), other
                    ))),
                }
            }
        }
    };
}

string_enum!(JobStatus { Active => "active", Paused => "paused", Disabled => "disabled" });
string_enum!(TriggerType { Cron => "cron", Cdc => "cdc" });
string_enum!(JobType { Custom => "custom", System => "system" });
string_enum!(RunStatus { Success => "success", Failed => "failed" });

/// A scheduled unit of work. Created explicitly or derived from a CDC trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub name: String,
    /// Cron or interval expression. Empty for CDC-triggered jobs.
    pub schedule: String,
    pub payload: String,
    pub status: JobStatus,
    pub trigger_type: TriggerType,
    pub job_type: JobType,
    pub owner: Option<String>,
    pub next_run_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Metadata envelope of the entity that created the job, stored opaque.
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub last_run_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// New active job with a fresh id.
    pub fn new(name: impl Into<String>, schedule: impl Into<String>, trigger_type: TriggerType) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            schedule: schedule.into(),
            payload: String::new(),
            status: JobStatus::Active,
            trigger_type,
            job_type: JobType::Custom,
            owner: None,
            next_run_time: None,
            labels: BTreeMap::new(),
            metadata: serde_json::Value::Null,
            last_run_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn is_runnable(&self) -> bool {
        self.status == JobStatus::Active
    }

    /// Cron jobs need an expression; CDC jobs are triggered by notifications.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::InvalidJob("job name is required".into()));
        }
        if self.trigger_type == TriggerType::Cron && self.schedule.trim().is_empty() {
            return Err(SchedulerError::InvalidJob(format!(
                "cron job '{}' has no schedule",
                self.name
            )));
        }
        Ok(())
    }
}

/// One execution of a job. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRun {
    pub id: String,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Job not found: {id}")]
    NotFound { id: String },

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Job {id} is {status} and cannot run")]
    NotRunnable { id: String, status: JobStatus },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Listener error: {0}")]
    Listener(String),

    #[error("Handler error: {0}")]
    Handler(String),
}

impl SchedulerError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

impl From<SchedulerError> for orca_common::OrcaError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Configuration(msg) => orca_common::OrcaError::Config(msg),
            other => orca_common::OrcaError::Database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_strings() {
        assert_eq!(JobStatus::Paused.as_str(), "paused");
        assert_eq!("cdc".parse::<TriggerType>().unwrap(), TriggerType::Cdc);
        assert!("hourly".parse::<JobStatus>().is_err());
        assert_eq!(serde_json::to_string(&JobType::Custom).unwrap(), "\"custom\"");
    }

    #[test]
    fn test_job_validation() {
        let job = Job::new("nightly", "0 0 * * *", TriggerType::Cron);
        assert!(job.validate().is_ok());
        assert!(job.is_runnable());

        let no_schedule = Job::new("nightly", "", TriggerType::Cron);
        assert!(matches!(no_schedule.validate(), Err(SchedulerError::InvalidJob(_))));

        let cdc = Job::new("cdc:insert:42", "", TriggerType::Cdc);
        assert!(cdc.validate().is_ok());
    }
}
