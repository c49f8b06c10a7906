use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single orchestration step. Never modified after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    pub service: String,
    pub action: String,
    /// RFC 3339, second precision.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
}

impl OrchestrationEvent {
    /// Stamped with the current UTC time.
    pub fn new(
        service: impl Into<String>,
        action: impl Into<String>,
        details: Map<String, Value>,
        state: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            action: action.into(),
            timestamp: Utc::now().trunc_subsecs(0),
            details,
            state: state.into(),
        }
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}

/// Build a details map from `(key, value)` pairs.
pub fn details<I, K>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_event_is_stamped() {
        let before = Utc::now().trunc_subsecs(0);
        let event = OrchestrationEvent::new("nexus", "start", details([("info", json!("init"))]), "pending");
        assert!(event.timestamp >= before);
        assert_eq!(event.detail("info"), Some(&json!("init")));
    }

    #[test]
    fn test_serialized_timestamp_is_rfc3339() {
        let event = OrchestrationEvent::new("nexus", "start", Map::new(), "");
        let value = serde_json::to_value(&event).unwrap();
        let ts = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
        assert!(value.get("details").is_none());
        assert!(value.get("state").is_none());
    }
}
