//! Graph and registrar clients that forward to other domains over the bus.

use std::sync::Arc;

use async_trait::async_trait;
use orca_common::OrcaError;
use orca_dispatch::EventBus;
use orca_ledger::{GraphClient, GraphUpdate, Metadata, Registration, ServiceRegistrar};

pub const GRAPH_UPDATE_EVENT: &str = "graph:update:v1:requested";
pub const REGISTER_EVENT: &str = "nexus:register:v1:requested";

pub struct BusGraphClient {
    bus: Arc<dyn EventBus>,
}

impl BusGraphClient {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl GraphClient for BusGraphClient {
    async fn publish_update(&self, update: GraphUpdate) -> orca_common::Result<()> {
        let mut meta = Metadata::default();
        meta.fields.insert("graph_update".to_string(), serde_json::to_value(&update)?);
        self.bus
            .publish(GRAPH_UPDATE_EVENT, &update.id, meta)
            .await
            .map_err(|e| OrcaError::Bus(e.to_string()))
    }
}

pub struct BusRegistrar {
    bus: Arc<dyn EventBus>,
}

impl BusRegistrar {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ServiceRegistrar for BusRegistrar {
    async fn register(&self, registration: Registration) -> orca_common::Result<()> {
        let mut meta = Metadata::default();
        meta.fields.insert("registration".to_string(), serde_json::to_value(&registration)?);
        self.bus
            .publish(REGISTER_EVENT, &registration.entity_id, meta)
            .await
            .map_err(|e| OrcaError::Bus(e.to_string()))
    }
}
