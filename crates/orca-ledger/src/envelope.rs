//! Metadata envelope
//!
//! Wire shape:
//!
//! ```json
//! {
//!   "service_specific": {
//!     "content": { "trace": [...], "state": "completed", "editor_notes": "..." }
//!   },
//!   "tags": ["user:u-1"],
//!   "locale": "en"
//! }
//! ```
//!
//! `trace` and `state` are readable by anyone but only writable through the
//! ledger functions in this crate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::OrchestrationEvent;
use crate::{LedgerError, Result};

/// Keys of a domain section owned by the ledger.
pub const RESERVED_KEYS: &[&str] = &["trace", "state"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    service_specific: Option<ServiceSpecific>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Any other top-level fields, preserved as-is.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Metadata {
    /// Envelope with an empty `service_specific` section, ready for ledger writes.
    /// `Metadata::default()` has none and ledger writes to it fail.
    pub fn new() -> Self {
        Self {
            service_specific: Some(ServiceSpecific::default()),
            ..Self::default()
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn service_specific(&self) -> Option<&ServiceSpecific> {
        self.service_specific.as_ref()
    }

    pub fn has_service_specific(&self) -> bool {
        self.service_specific.is_some()
    }

    /// Initialise `service_specific` if absent.
    pub fn ensure_service_specific(&mut self) -> &mut ServiceSpecific {
        self.service_specific.get_or_insert_with(ServiceSpecific::default)
    }

    pub fn domain(&self, domain: &str) -> Option<&DomainSection> {
        self.service_specific.as_ref().and_then(|ss| ss.get(domain))
    }

    /// Domain section for writing, created on demand. Fails if the envelope
    /// was never initialised.
    pub fn domain_mut(&mut self, domain: &str) -> Result<&mut DomainSection> {
        self.service_specific
            .as_mut()
            .map(|ss| ss.section_mut(domain))
            .ok_or(LedgerError::MissingServiceSpecific)
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// `service_specific`, keyed by domain name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceSpecific(BTreeMap<String, DomainSection>);

impl ServiceSpecific {
    pub fn get(&self, domain: &str) -> Option<&DomainSection> {
        self.0.get(domain)
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.0.contains_key(domain)
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn section_mut(&mut self, domain: &str) -> &mut DomainSection {
        self.0.entry(domain.to_string()).or_default()
    }
}

/// One domain's slice of the envelope: the ledger-owned `trace` and `state`
/// plus open extension fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainSection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    trace: Vec<OrchestrationEvent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<String>,

    #[serde(flatten)]
    extensions: Map<String, Value>,
}

impl DomainSection {
    pub fn trace(&self) -> &[OrchestrationEvent] {
        &self.trace
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn extensions(&self) -> &Map<String, Value> {
        &self.extensions
    }

    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    /// Set a domain-specific field. `trace` and `state` are rejected.
    pub fn set_extension(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        if RESERVED_KEYS.contains(&key.as_str()) {
            return Err(LedgerError::ReservedKey { key });
        }
        self.extensions.insert(key, value);
        Ok(())
    }

    pub fn remove_extension(&mut self, key: &str) -> Option<Value> {
        self.extensions.remove(key)
    }

    pub(crate) fn push_event(&mut self, event: OrchestrationEvent) {
        self.trace.push(event);
    }

    pub(crate) fn set_state(&mut self, state: String) {
        self.state = Some(state);
    }

    pub(crate) fn extension_mut(&mut self, key: &str) -> &mut Value {
        self.extensions.entry(key.to_string()).or_insert(Value::Null)
    }
}
