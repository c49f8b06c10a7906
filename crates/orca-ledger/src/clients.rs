//! Collaborator contracts resolved from the container by orchestration stages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphUpdate {
    pub id: String,
    pub update_type: String,
    pub service_id: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// Knowledge graph publisher.
#[async_trait]
pub trait GraphClient: Send + Sync {
    async fn publish_update(&self, update: GraphUpdate) -> orca_common::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub entity_type: String,
    pub entity_id: String,
    pub domain: String,
    pub metadata: serde_json::Value,
}

/// Cross-service registry that other domains query for known entities.
#[async_trait]
pub trait ServiceRegistrar: Send + Sync {
    async fn register(&self, registration: Registration) -> orca_common::Result<()>;
}
