use async_trait::async_trait;

use crate::{Job, JobRun, JobStatus, Result};

/// Normalized page request. Page numbers start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    pub const DEFAULT_PAGE_SIZE: u32 = 10;

    /// A page below 1 becomes 1, a page size below 1 becomes 10.
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: if page_size < 1 { Self::DEFAULT_PAGE_SIZE } else { page_size },
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.page_size as u64
    }

    pub fn limit(&self) -> u64 {
        self.page_size as u64
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_job(&self, job: Job) -> Result<Job>;

    async fn update_job(&self, job: Job) -> Result<Job>;

    async fn delete_job(&self, job_id: &str) -> Result<()>;

    async fn get_job(&self, job_id: &str) -> Result<Job>;

    /// Jobs ordered by creation time, newest first.
    async fn list_jobs(&self, page: u32, page_size: u32, status: Option<JobStatus>) -> Result<Page<Job>>;

    /// Record an execution of the job and point its `last_run_id` at it.
    async fn run_job(&self, job_id: &str) -> Result<JobRun>;

    /// Runs of one job, newest first. `NotFound` when the job does not exist.
    async fn list_job_runs(&self, job_id: &str, page: u32, page_size: u32) -> Result<Page<JobRun>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults() {
        let p = Pagination::new(0, 0);
        assert_eq!(p, Pagination { page: 1, page_size: 10 });
        assert_eq!(p.offset(), 0);

        let p = Pagination::new(3, 25);
        assert_eq!(p.offset(), 50);
        assert_eq!(p.limit(), 25);
    }
}
