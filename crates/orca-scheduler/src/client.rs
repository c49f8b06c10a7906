use async_trait::async_trait;
use tracing::info;

use crate::repository::JobRepository;
use crate::{Job, Result};

/// Submit side of the scheduler, as seen by orchestration helpers.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    async fn submit_job(&self, job: Job) -> Result<Job>;
}

#[async_trait]
impl<R> SchedulerClient for R
where
    R: JobRepository + ?Sized,
{
    async fn submit_job(&self, job: Job) -> Result<Job> {
        let job = self.create_job(job).await?;
        info!(job_id = %job.id, name = %job.name, trigger = %job.trigger_type, "Job registered");
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryJobRepository, TriggerType};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_repository_is_a_scheduler_client() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let client: Arc<dyn SchedulerClient> = repo.clone();

        let job = client
            .submit_job(Job::new("pattern-42", "@every 5m", TriggerType::Cron))
            .await
            .unwrap();
        assert_eq!(repo.get_job(&job.id).await.unwrap().schedule, "@every 5m");
    }
}
