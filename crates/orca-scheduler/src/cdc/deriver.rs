use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::bridge::CdcHandler;
use super::CdcTrigger;
use crate::repository::JobRepository;
use crate::{Job, JobType, Result, SchedulerError, TriggerType};

/// Payload written by the notify trigger: `{"id": ..., "event_type": ...}`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CdcNotification {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub event_type: Option<String>,
}

fn id_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unsupported id: {}", other))),
    }
}

impl CdcNotification {
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| SchedulerError::InvalidJob(format!("malformed CDC payload: {}", e)))
    }
}

/// Turns each notification into a CDC-triggered job.
pub struct CdcJobDeriver {
    trigger: CdcTrigger,
    repository: Arc<dyn JobRepository>,
    owner: Option<String>,
}

impl CdcJobDeriver {
    pub fn new(trigger: CdcTrigger, repository: Arc<dyn JobRepository>) -> Self {
        Self {
            trigger,
            repository,
            owner: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn derive_job(&self, payload: &str) -> Result<Job> {
        let notification = CdcNotification::parse(payload)?;
        let event_type = notification
            .event_type
            .clone()
            .unwrap_or_else(|| self.trigger.event_type().to_string());

        let mut job = Job::new(format!("cdc:{}:{}", event_type, notification.id), "", TriggerType::Cdc)
            .with_payload(payload)
            .with_label("cdc_channel", self.trigger.channel())
            .with_label("record_id", notification.id.clone())
            .with_metadata(json!({
                "service_specific": {
                    "scheduler": {
                        "cdc": {
                            "table": self.trigger.table(),
                            "event_type": event_type,
                            "record_id": notification.id,
                        }
                    }
                }
            }));
        job.job_type = JobType::System;
        if let Some(owner) = &self.owner {
            job = job.with_owner(owner.clone());
        }
        Ok(job)
    }
}

#[async_trait]
impl CdcHandler for CdcJobDeriver {
    async fn handle(&self, payload: String) -> Result<()> {
        let job = self.derive_job(&payload)?;
        let job = self.repository.create_job(job).await?;
        info!(job_id = %job.id, channel = %self.trigger.channel(), "Job derived from CDC notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryJobRepository;

    fn deriver() -> (Arc<InMemoryJobRepository>, CdcJobDeriver) {
        let repo = Arc::new(InMemoryJobRepository::new());
        let trigger = CdcTrigger::new("master", "insert").unwrap();
        (repo.clone(), CdcJobDeriver::new(trigger, repo))
    }

    #[test]
    fn test_numeric_and_string_ids() {
        assert_eq!(CdcNotification::parse(r#"{"id":"42"}"#).unwrap().id, "42");
        assert_eq!(CdcNotification::parse(r#"{"id":42,"event_type":"insert"}"#).unwrap().id, "42");
        assert!(CdcNotification::parse(r#"{"id":null}"#).is_err());
        assert!(CdcNotification::parse("not json").is_err());
    }

    #[test]
    fn test_derived_job_shape() {
        let (_, deriver) = deriver();
        let job = deriver.derive_job(r#"{"id":"42"}"#).unwrap();

        assert_eq!(job.name, "cdc:insert:42");
        assert_eq!(job.trigger_type, TriggerType::Cdc);
        assert_eq!(job.labels.get("cdc_channel").map(String::as_str), Some("cdc_master_insert"));
        assert_eq!(job.metadata["service_specific"]["scheduler"]["cdc"]["record_id"], "42");
    }

    #[tokio::test]
    async fn test_each_notification_creates_a_job() {
        let (repo, deriver) = deriver();
        deriver.handle(r#"{"id":"42"}"#.to_string()).await.unwrap();
        deriver.handle(r#"{"id":"42"}"#.to_string()).await.unwrap();
        assert_eq!(repo.job_count(), 2);
    }
}
