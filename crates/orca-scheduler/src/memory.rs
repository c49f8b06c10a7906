//! In-memory job repository for tests and single-process runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::repository::{JobRepository, Page, Pagination};
use crate::{Job, JobRun, JobStatus, Result, RunStatus, SchedulerError};

#[derive(Default)]
struct State {
    jobs: HashMap<String, Job>,
    /// Insertion order is run order.
    runs: Vec<JobRun>,
}

#[derive(Default)]
pub struct InMemoryJobRepository {
    state: RwLock<State>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_count(&self) -> usize {
        self.state.read().jobs.len()
    }
}

fn paginate<T: Clone>(items: Vec<T>, pagination: Pagination) -> Page<T> {
    let total = items.len() as u64;
    let items = items
        .into_iter()
        .skip(pagination.offset() as usize)
        .take(pagination.limit() as usize)
        .collect();
    Page {
        items,
        total,
        page: pagination.page,
        page_size: pagination.page_size,
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create_job(&self, job: Job) -> Result<Job> {
        job.validate()?;
        let mut state = self.state.write();
        if state.jobs.contains_key(&job.id) {
            return Err(SchedulerError::InvalidJob(format!("job {} already exists", job.id)));
        }
        state.jobs.insert(job.id.clone(), job.clone());
        debug!(job_id = %job.id, name = %job.name, "Job created");
        Ok(job)
    }

    async fn update_job(&self, mut job: Job) -> Result<Job> {
        job.validate()?;
        let mut state = self.state.write();
        let existing = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| SchedulerError::NotFound { id: job.id.clone() })?;
        job.created_at = existing.created_at;
        job.last_run_id = existing.last_run_id.clone();
        job.updated_at = Utc::now();
        *existing = job.clone();
        Ok(job)
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.jobs.remove(job_id).is_none() {
            return Err(SchedulerError::NotFound { id: job_id.to_string() });
        }
        state.runs.retain(|r| r.job_id != job_id);
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.state
            .read()
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| SchedulerError::NotFound { id: job_id.to_string() })
    }

    async fn list_jobs(&self, page: u32, page_size: u32, status: Option<JobStatus>) -> Result<Page<Job>> {
        let mut jobs: Vec<Job> = self
            .state
            .read()
            .jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(paginate(jobs, Pagination::new(page, page_size)))
    }

    async fn run_job(&self, job_id: &str) -> Result<JobRun> {
        let mut state = self.state.write();
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulerError::NotFound { id: job_id.to_string() })?;
        if !job.is_runnable() {
            return Err(SchedulerError::NotRunnable { id: job.id.clone(), status: job.status });
        }

        let now = Utc::now();
        let run = JobRun {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            started_at: now,
            finished_at: Some(now),
            status: RunStatus::Success,
            result: Some("dispatched".to_string()),
            error: None,
            metadata: job.metadata.clone(),
        };
        job.last_run_id = Some(run.id.clone());
        job.updated_at = now;
        state.runs.push(run.clone());
        Ok(run)
    }

    async fn list_job_runs(&self, job_id: &str, page: u32, page_size: u32) -> Result<Page<JobRun>> {
        let state = self.state.read();
        if !state.jobs.contains_key(job_id) {
            return Err(SchedulerError::NotFound { id: job_id.to_string() });
        }
        let runs: Vec<JobRun> = state.runs.iter().rev().filter(|r| r.job_id == job_id).cloned().collect();
        Ok(paginate(runs, Pagination::new(page, page_size)))
    }
}
