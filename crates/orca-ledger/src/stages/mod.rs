//! Stock orchestration stages.

mod cache;
mod graph;
mod registration;
mod schedule;

pub use cache::CacheStage;
pub use graph::GraphEnrichStage;
pub use registration::RegistrationStage;
pub use schedule::ScheduleStage;

use std::sync::Arc;
use std::time::Duration;

use orca_common::Cache;

use crate::pipeline::BestEffortPipeline;

/// Cache, schedule, graph enrichment and registration, in that order.
pub fn standard_pipeline(cache: Arc<dyn Cache>, cache_ttl: Duration) -> BestEffortPipeline {
    BestEffortPipeline::new()
        .with_stage(Arc::new(CacheStage::new(cache, cache_ttl)))
        .with_stage(Arc::new(ScheduleStage))
        .with_stage(Arc::new(GraphEnrichStage))
        .with_stage(Arc::new(RegistrationStage))
}
