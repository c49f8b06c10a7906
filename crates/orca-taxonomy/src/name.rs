//! Canonical event names
//!
//! Wire format: `<domain>:<action>:v<N>:<state>`, e.g.
//! `content:create_content:v1:requested`.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Result, TaxonomyError};

/// States accepted by strict validation.
pub const VALID_STATES: &[&str] = &[
    "request",
    "requested",
    "started",
    "success",
    "failed",
    "completed",
    "cancelled",
    "timeout",
];

/// States generated for every registered action.
pub const LIFECYCLE_STATES: &[&str] = &["requested", "started", "success", "failed", "completed"];

fn event_type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z][a-z0-9_]*:[a-z][a-z0-9_]*:v[0-9]+:[a-z][a-z0-9_]*$")
            .expect("event type pattern is a valid regex")
    })
}

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("segment pattern is a valid regex"))
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^v[0-9]+$").expect("version pattern is a valid regex"))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalEventName {
    domain: String,
    action: String,
    version: String,
    state: String,
}

impl CanonicalEventName {
    /// Build a name from its parts. `version` may be given with or without the
    /// leading `v`.
    ///
    /// Domain, action and state must match `[a-z][a-z0-9_]*` so the formatted
    /// name parses back to the same parts.
    pub fn format(
        domain: impl Into<String>,
        action: impl Into<String>,
        version: impl AsRef<str>,
        state: impl Into<String>,
    ) -> Result<Self> {
        let name = Self {
            domain: domain.into(),
            action: action.into(),
            version: normalize_version(version.as_ref()),
            state: state.into(),
        };
        for (part, value) in [("domain", &name.domain), ("action", &name.action), ("state", &name.state)] {
            if !segment_pattern().is_match(value) {
                return Err(TaxonomyError::invalid(
                    name.to_string(),
                    format!("{} '{}' must match [a-z][a-z0-9_]*", part, value),
                ));
            }
        }
        if !version_pattern().is_match(&name.version) {
            return Err(TaxonomyError::invalid(
                name.to_string(),
                format!("version '{}' must be v<N>", name.version),
            ));
        }
        Ok(name)
    }

    /// Lenient parse: split on `:` and require at least four non-empty leading
    /// segments. Anything after the fourth segment is ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(':').collect();
        match parts.as_slice() {
            [domain, action, version, state, ..]
                if !domain.is_empty() && !action.is_empty() && !version.is_empty() && !state.is_empty() =>
            {
                Ok(Self {
                    domain: domain.to_string(),
                    action: action.to_string(),
                    version: version.to_string(),
                    state: state.to_string(),
                })
            }
            _ => Err(TaxonomyError::MalformedEventName { value: raw.to_string() }),
        }
    }

    /// Strict parse: full grammar and a known state.
    pub fn parse_strict(raw: &str) -> Result<Self> {
        validate_event_type(raw)?;
        Self::parse(raw)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn is_requested(&self) -> bool {
        self.state == orca_common::STATE_REQUESTED
    }

    /// Same domain/action/version with a different lifecycle state.
    pub fn with_state(&self, state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            ..self.clone()
        }
    }

    /// `"<domain>:<action>:"`, the prefix every event of this action carries.
    pub fn action_prefix(&self) -> String {
        format!("{}:{}:", self.domain, self.action)
    }
}

impl fmt::Display for CanonicalEventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.domain, self.action, self.version, self.state)
    }
}

impl FromStr for CanonicalEventName {
    type Err = TaxonomyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CanonicalEventName {
    type Error = TaxonomyError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CanonicalEventName> for String {
    fn from(name: CanonicalEventName) -> Self {
        name.to_string()
    }
}

/// Extract `(action, state)` from an event type, if it has at least four segments.
pub fn parse_action_and_state(event_type: &str) -> Option<(String, String)> {
    CanonicalEventName::parse(event_type)
        .ok()
        .map(|n| (n.action, n.state))
}

/// Validate an event type against the canonical grammar.
pub fn validate_event_type(event_type: &str) -> Result<()> {
    if event_type.is_empty() {
        return Err(TaxonomyError::invalid(event_type, "event type is required"));
    }
    if !event_type_pattern().is_match(event_type) {
        return Err(TaxonomyError::invalid(
            event_type,
            "event type must follow format: {service}:{action}:v{version}:{state}",
        ));
    }
    let state = event_type.rsplit(':').next().unwrap_or_default();
    if !VALID_STATES.contains(&state) {
        return Err(TaxonomyError::invalid(
            event_type,
            format!("invalid state '{}', must be one of: {}", state, VALID_STATES.join(", ")),
        ));
    }
    Ok(())
}

/// `"1"`, `"1.0"` and `"v1"` all become `"v1"`.
fn normalize_version(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let major = digits.split('.').next().unwrap_or(digits);
    format!("v{}", major)
}
