use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use orca_common::Cache;

use crate::envelope::Metadata;
use crate::event::details;
use crate::pipeline::{Stage, StageContext, StageOutcome};
use crate::Result;

/// Writes the envelope to the TTL cache under `<entity_type>:<entity_id>`.
pub struct CacheStage {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl CacheStage {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn key(entity_type: &str, entity_id: &str) -> String {
        format!("{}:{}", entity_type, entity_id)
    }
}

#[async_trait]
impl Stage for CacheStage {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn run(&self, ctx: &StageContext<'_>, meta: &Metadata) -> Result<StageOutcome> {
        let key = Self::key(ctx.entity_type, ctx.entity_id);
        self.cache.set(&key, &meta.to_value()?, self.ttl).await?;
        Ok(StageOutcome::Completed(details([
            ("key", json!(key)),
            ("ttl_secs", json!(self.ttl.as_secs())),
        ])))
    }
}
