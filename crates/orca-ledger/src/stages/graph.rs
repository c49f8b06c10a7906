use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::clients::{GraphClient, GraphUpdate};
use crate::envelope::Metadata;
use crate::event::details;
use crate::pipeline::{Stage, StageContext, StageOutcome};
use crate::Result;

/// Publishes the entity as a knowledge graph node. The `GraphClient` is
/// resolved from the container on every run.
pub struct GraphEnrichStage;

#[async_trait]
impl Stage for GraphEnrichStage {
    fn name(&self) -> &'static str {
        "graph_enrich"
    }

    async fn run(&self, ctx: &StageContext<'_>, meta: &Metadata) -> Result<StageOutcome> {
        let client = ctx.resolver.resolve::<dyn GraphClient>()?;
        let now = Utc::now();

        let update = GraphUpdate {
            id: ctx.entity_id.to_string(),
            update_type: "pattern_detection".to_string(),
            service_id: ctx.domain.to_string(),
            payload: json!({
                "id": ctx.entity_id,
                "type": ctx.entity_type,
                "metadata": meta.to_value()?,
                "last_updated": now,
            }),
            timestamp: now,
            version: "1.0".to_string(),
        };
        client.publish_update(update).await?;

        Ok(StageOutcome::Completed(details([("node_type", json!(ctx.entity_type))])))
    }
}
