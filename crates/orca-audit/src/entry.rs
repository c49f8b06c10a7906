use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::{AuditError, Result};

/// `prev_hash` of the first entry in a chain.
pub const GENESIS_PREV_HASH: &str = "";

/// Fields covered by the chain hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub actor: String,
    pub result: String,
    #[serde(default)]
    pub details: Value,
}

impl AuditRecord {
    /// Stamped with the current time at microsecond precision, the
    /// resolution Postgres `TIMESTAMPTZ` keeps.
    pub fn new(
        action: impl Into<String>,
        actor: impl Into<String>,
        result: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            timestamp: Utc::now().trunc_subsecs(6),
            action: action.into(),
            actor: actor.into(),
            result: result.into(),
            details,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.action.trim().is_empty() {
            return Err(AuditError::InvalidRecord("action is required".to_string()));
        }
        if self.actor.trim().is_empty() {
            return Err(AuditError::InvalidRecord("actor is required".to_string()));
        }
        Ok(())
    }

    fn canonical_fields(&self) -> Value {
        json!({
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            "action": self.action,
            "actor": self.actor,
            "result": self.result,
            "details": self.details,
        })
    }
}

/// A persisted audit record with its chain links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(flatten)]
    pub record: AuditRecord,
    pub prev_hash: String,
    pub entry_hash: String,
}

impl AuditEntry {
    /// Link `record` onto a chain whose head hash is `prev_hash`.
    pub fn chain(record: AuditRecord, prev_hash: impl Into<String>) -> Self {
        let prev_hash = prev_hash.into();
        let entry_hash = compute_entry_hash(&record, &prev_hash);
        Self {
            record,
            prev_hash,
            entry_hash,
        }
    }

    /// Hash of the stored fields over the stored `prev_hash`.
    pub fn recompute_hash(&self) -> String {
        compute_entry_hash(&self.record, &self.prev_hash)
    }
}

/// Hex SHA-256 of `canonical_json(fields) ‖ prev_hash`.
pub fn compute_entry_hash(record: &AuditRecord, prev_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&record.canonical_fields()).as_bytes());
    hasher.update(prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": [ {"y": 1, "x": 2} ], "c": "q\"uote"}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":"q\"uote","z":[{"x":2,"y":1}]},"b":1}"#
        );
    }

    #[test]
    fn test_hash_depends_on_prev_hash() {
        let record = AuditRecord::new("login", "user-1", "success", json!({}));
        let genesis = compute_entry_hash(&record, GENESIS_PREV_HASH);
        let linked = compute_entry_hash(&record, &genesis);

        assert_eq!(genesis.len(), 64);
        assert_ne!(genesis, linked);
        assert_eq!(genesis, compute_entry_hash(&record.clone(), ""));
    }

    #[test]
    fn test_hash_ignores_detail_key_order() {
        let mut a = AuditRecord::new("set_policy", "admin", "success", json!({"policy": "p1", "level": 3}));
        let mut b = a.clone();
        a.details = serde_json::from_str(r#"{"policy":"p1","level":3}"#).unwrap();
        b.details = serde_json::from_str(r#"{"level":3,"policy":"p1"}"#).unwrap();
        assert_eq!(compute_entry_hash(&a, "x"), compute_entry_hash(&b, "x"));
    }

    #[test]
    fn test_validate() {
        assert!(AuditRecord::new("login", "u", "success", Value::Null).validate().is_ok());
        assert!(AuditRecord::new(" ", "u", "success", Value::Null).validate().is_err());
        assert!(AuditRecord::new("login", "", "success", Value::Null).validate().is_err());
    }
}
