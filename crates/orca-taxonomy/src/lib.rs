//! Orca Event Taxonomy
//!
//! Canonical event naming and the per-domain registry of names a domain may
//! emit or consume:
//! - `name`: the `domain:action:version:state` grammar
//! - `source`: where registered names come from (service registration JSON)
//! - `registry`: build-once, indexed lookup by `(action, state)`

pub mod name;
pub mod registry;
pub mod source;

pub use name::{parse_action_and_state, validate_event_type, CanonicalEventName, LIFECYCLE_STATES, VALID_STATES};
pub use registry::TaxonomyRegistry;
pub use source::{JsonRegistrationSource, RegistrationSource, StaticRegistrationSource};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaxonomyError {
    #[error("Malformed event name: {value}")]
    MalformedEventName { value: String },

    #[error("Invalid event type '{value}': {reason}")]
    InvalidEventType { value: String, reason: String },

    #[error("Event type not registered: {domain}:{action}:*:{state}")]
    NotFound { domain: String, action: String, state: String },

    #[error("Registration source error: {0}")]
    Source(String),
}

impl TaxonomyError {
    pub fn invalid(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEventType {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TaxonomyError>;
