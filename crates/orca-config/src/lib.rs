//! Orca Configuration
//!
//! Loads `orca.toml` and layers `ORCA_*` environment variables on top.
//!
//! ## Environment Variables
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `ORCA_HTTP_PORT` | `server.http_port` |
//! | `ORCA_DATABASE_URL` | `database.url` |
//! | `ORCA_DATABASE_MAX_CONNECTIONS` | `database.max_connections` |
//! | `ORCA_REDIS_URL` | `redis.url` |
//! | `ORCA_REGISTRY_PATH` | `registry.path` |
//! | `ORCA_CDC_ENABLED` | `cdc.enabled` |
//! | `ORCA_AUDIT_BACKEND` | `audit.backend` |
//! | `ORCA_LOG_LEVEL` | `logging.level` |
//! | `ORCA_LOG_JSON` | `logging.json` |

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http_port: u16,
    /// Domains whose dispatchers are started by this process.
    pub domains: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 9090,
            domains: vec!["scheduler".to_string(), "security".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub key_prefix: String,
    pub default_ttl_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: "orca:".to_string(),
            default_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Service registration JSON used to build the event taxonomy.
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config/service_registration.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdcTriggerConfig {
    pub table: String,
    pub event_type: String,
}

/// Upper bound for `cdc.max_reconnect_secs` (one hour).
pub const MAX_RECONNECT_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CdcConfig {
    pub enabled: bool,
    pub min_reconnect_secs: u64,
    pub max_reconnect_secs: u64,
    pub triggers: Vec<CdcTriggerConfig>,
}

impl Default for CdcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_reconnect_secs: 10,
            max_reconnect_secs: 60,
            triggers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditBackend {
    Memory,
    Postgres,
}

impl FromStr for AuditBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub backend: AuditBackend,
    /// Verify the full chain once at startup and log the report.
    pub verify_on_startup: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            backend: AuditBackend::Memory,
            verify_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrcaConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub registry: RegistryConfig,
    pub cdc: CdcConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

impl OrcaConfig {
    /// Load from a TOML file, then apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides()?;
        config.validate()?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Defaults plus environment overrides; used when no file is given.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ORCA_HTTP_PORT") {
            self.server.http_port = parse_override("ORCA_HTTP_PORT", &v)?;
        }
        if let Some(v) = lookup("ORCA_DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Some(v) = lookup("ORCA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_override("ORCA_DATABASE_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = lookup("ORCA_REDIS_URL") {
            self.redis.url = Some(v);
        }
        if let Some(v) = lookup("ORCA_REGISTRY_PATH") {
            self.registry.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ORCA_CDC_ENABLED") {
            self.cdc.enabled = parse_override("ORCA_CDC_ENABLED", &v)?;
        }
        if let Some(v) = lookup("ORCA_AUDIT_BACKEND") {
            self.audit.backend = parse_override("ORCA_AUDIT_BACKEND", &v)?;
        }
        if let Some(v) = lookup("ORCA_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("ORCA_LOG_JSON") {
            self.logging.json = parse_override("ORCA_LOG_JSON", &v)?;
        }
        debug!("Environment overrides applied");
        Ok(())
    }

    /// Reject configurations that can only fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.cdc.enabled && self.database.url.is_none() {
            return Err(ConfigError::Invalid(
                "cdc.enabled requires database.url".to_string(),
            ));
        }
        if self.audit.backend == AuditBackend::Postgres && self.database.url.is_none() {
            return Err(ConfigError::Invalid(
                "audit.backend = postgres requires database.url".to_string(),
            ));
        }
        if self.cdc.min_reconnect_secs == 0
            || self.cdc.min_reconnect_secs > self.cdc.max_reconnect_secs
            || self.cdc.max_reconnect_secs > MAX_RECONNECT_SECS
        {
            return Err(ConfigError::Invalid(format!(
                "cdc reconnect bounds invalid: min={} max={}",
                self.cdc.min_reconnect_secs, self.cdc.max_reconnect_secs
            )));
        }
        if self.server.domains.iter().any(|d| d.trim().is_empty()) {
            return Err(ConfigError::Invalid("server.domains contains an empty name".to_string()));
        }
        Ok(())
    }
}

fn parse_override<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = r#"
[server]
http_port = 8088
domains = ["content", "security"]

[database]
url = "postgres://localhost/orca"

[cdc]
enabled = true
triggers = [{ table = "master", event_type = "insert" }]

[audit]
backend = "postgres"
"#;

    #[test]
    fn test_defaults() {
        let config = OrcaConfig::default();
        assert_eq!(config.server.http_port, 9090);
        assert_eq!(config.cdc.min_reconnect_secs, 10);
        assert_eq!(config.cdc.max_reconnect_secs, 60);
        assert_eq!(config.audit.backend, AuditBackend::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config = OrcaConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.server.http_port, 8088);
        assert_eq!(config.server.domains, vec!["content", "security"]);
        assert_eq!(config.cdc.triggers, vec![CdcTriggerConfig {
            table: "master".to_string(),
            event_type: "insert".to_string(),
        }]);
        assert_eq!(config.audit.backend, AuditBackend::Postgres);
        // Unspecified sections keep defaults
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ORCA_HTTP_PORT", "7000"),
            ("ORCA_LOG_JSON", "true"),
            ("ORCA_AUDIT_BACKEND", "memory"),
        ]);
        let mut config = OrcaConfig::from_toml_str(SAMPLE).unwrap();
        config.apply_overrides_from(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.server.http_port, 7000);
        assert!(config.logging.json);
        assert_eq!(config.audit.backend, AuditBackend::Memory);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = OrcaConfig::default();
        let err = config
            .apply_overrides_from(|k| (k == "ORCA_HTTP_PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { .. }));
    }

    #[test]
    fn test_cdc_requires_database() {
        let mut config = OrcaConfig::default();
        config.cdc.enabled = true;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_reconnect_ceiling() {
        let mut config = OrcaConfig::default();
        config.cdc.max_reconnect_secs = MAX_RECONNECT_SECS;
        assert!(config.validate().is_ok());

        config.cdc.max_reconnect_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = OrcaConfig::load(file.path()).unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/orca"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = OrcaConfig::load("/nonexistent/orca.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
