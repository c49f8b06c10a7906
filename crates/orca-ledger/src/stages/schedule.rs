use async_trait::async_trait;
use serde_json::json;

use orca_scheduler::{Job, JobType, SchedulerClient, TriggerType};

use crate::envelope::Metadata;
use crate::event::details;
use crate::ledger::{extract_schedule, SCHEDULING_SECTION};
use crate::pipeline::{Stage, StageContext, StageOutcome};
use crate::Result;

/// Registers an active cron job for entities whose envelope carries a
/// `scheduling` section. Entities without one are skipped.
pub struct ScheduleStage;

impl ScheduleStage {
    pub fn build_job(ctx: &StageContext<'_>, meta: &Metadata) -> Result<Job> {
        let schedule = extract_schedule(meta)?;
        let mut job = Job::new(ctx.entity_id, schedule, TriggerType::Cron)
            .with_metadata(meta.to_value()?)
            .with_label("entity_type", ctx.entity_type)
            .with_label("domain", ctx.domain);
        job.job_type = JobType::Custom;
        Ok(job)
    }
}

#[async_trait]
impl Stage for ScheduleStage {
    fn name(&self) -> &'static str {
        "schedule"
    }

    async fn run(&self, ctx: &StageContext<'_>, meta: &Metadata) -> Result<StageOutcome> {
        if meta.domain(SCHEDULING_SECTION).is_none() {
            return Ok(StageOutcome::Skipped("no scheduling section".to_string()));
        }

        let job = Self::build_job(ctx, meta)?;
        let scheduler = ctx.resolver.resolve::<dyn SchedulerClient>()?;
        let job = scheduler.submit_job(job).await?;

        Ok(StageOutcome::Completed(details([
            ("job_id", json!(job.id)),
            ("schedule", json!(job.schedule)),
        ])))
    }
}
