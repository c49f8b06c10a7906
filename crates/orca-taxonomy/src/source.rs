//! Registration sources
//!
//! A source yields every canonical event name known to the platform. The
//! registry calls it exactly once.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::name::{CanonicalEventName, LIFECYCLE_STATES};
use crate::{Result, TaxonomyError};

pub trait RegistrationSource: Send + Sync {
    /// All raw canonical names across every domain.
    fn load_all(&self) -> Result<Vec<String>>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// One entry of the service registration document.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceRegistration {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub endpoints: Vec<ServiceEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEndpoint {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub actions: Vec<String>,
}

fn default_version() -> String {
    "v1".to_string()
}

/// Reads the service registration JSON (an array of services, each with
/// endpoints listing their actions) and expands every action into one name
/// per lifecycle state.
pub struct JsonRegistrationSource {
    origin: JsonOrigin,
}

enum JsonOrigin {
    File(PathBuf),
    Inline(String),
}

impl JsonRegistrationSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { origin: JsonOrigin::File(path.into()) }
    }

    pub fn from_json(raw: impl Into<String>) -> Self {
        Self { origin: JsonOrigin::Inline(raw.into()) }
    }

    fn read(&self) -> Result<String> {
        match &self.origin {
            JsonOrigin::File(path) => read_file(path),
            JsonOrigin::Inline(raw) => Ok(raw.clone()),
        }
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        TaxonomyError::Source(format!("cannot read {}: {}", path.display(), e))
    })
}

/// Expand service registrations into canonical names. Actions or service
/// names outside the event grammar are skipped with a warning.
pub fn expand_registrations(services: &[ServiceRegistration]) -> Vec<String> {
    let mut names = Vec::new();
    for service in services {
        for endpoint in &service.endpoints {
            for action in &endpoint.actions {
                for state in LIFECYCLE_STATES {
                    match CanonicalEventName::format(&service.name, action, &service.version, *state) {
                        Ok(name) => names.push(name.to_string()),
                        Err(e) => warn!(service = %service.name, action = %action, error = %e, "Skipping registration"),
                    }
                }
            }
        }
    }
    names
}

impl RegistrationSource for JsonRegistrationSource {
    fn load_all(&self) -> Result<Vec<String>> {
        let raw = self.read()?;
        let services: Vec<ServiceRegistration> = serde_json::from_str(&raw)
            .map_err(|e| TaxonomyError::Source(format!("invalid service registration: {}", e)))?;
        let names = expand_registrations(&services);
        debug!(services = services.len(), names = names.len(), "Expanded service registrations");
        Ok(names)
    }

    fn describe(&self) -> String {
        match &self.origin {
            JsonOrigin::File(path) => format!("json:{}", path.display()),
            JsonOrigin::Inline(_) => "json:inline".to_string(),
        }
    }
}

/// Fixed list of names, for embedding and tests.
pub struct StaticRegistrationSource {
    names: Vec<String>,
}

impl StaticRegistrationSource {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { names: names.into_iter().map(Into::into).collect() }
    }
}

impl RegistrationSource for StaticRegistrationSource {
    fn load_all(&self) -> Result<Vec<String>> {
        Ok(self.names.clone())
    }

    fn describe(&self) -> String {
        format!("static:{}", self.names.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRATION: &str = r#"[
        {
            "name": "content",
            "version": "v1",
            "endpoints": [
                { "path": "/api/content", "actions": ["create_content", "delete_content"] }
            ]
        },
        { "name": "security", "version": "1.0", "endpoints": [{ "actions": ["audit"] }] },
        { "name": "empty" }
    ]"#;

    #[test]
    fn test_expand_every_lifecycle_state() {
        let names = JsonRegistrationSource::from_json(REGISTRATION).load_all().unwrap();
        // 3 actions x 5 states
        assert_eq!(names.len(), 15);
        assert!(names.contains(&"content:create_content:v1:requested".to_string()));
        assert!(names.contains(&"content:delete_content:v1:completed".to_string()));
        assert!(names.contains(&"security:audit:v1:failed".to_string()));
    }

    #[test]
    fn test_actions_outside_grammar_are_skipped() {
        let raw = r#"[{ "name": "content", "endpoints": [{ "actions": ["create:content", "publish"] }] }]"#;
        let names = JsonRegistrationSource::from_json(raw).load_all().unwrap();
        assert_eq!(names.len(), 5);
        assert!(names.iter().all(|n| n.starts_with("content:publish:v1:")));
    }

    #[test]
    fn test_invalid_json_is_source_error() {
        let err = JsonRegistrationSource::from_json("{not json").load_all().unwrap_err();
        assert!(matches!(err, TaxonomyError::Source(_)));
    }

    #[test]
    fn test_missing_file_is_source_error() {
        let source = JsonRegistrationSource::from_path("/nonexistent/registration.json");
        assert!(matches!(source.load_all(), Err(TaxonomyError::Source(_))));
        assert!(source.describe().starts_with("json:"));
    }
}
