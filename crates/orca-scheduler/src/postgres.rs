use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::repository::{JobRepository, Page, Pagination};
use crate::{Job, JobRun, JobStatus, Result, RunStatus, SchedulerError};

const JOB_COLUMNS: &str = "id, name, schedule, payload, status, trigger_type, job_type, owner, \
     next_run_time, labels, metadata, last_run_id, created_at, updated_at";

const RUN_COLUMNS: &str = "id, job_id, started_at, finished_at, status, result, error, metadata";

pub struct PostgresJobRepository {
    pool: PgPool,
}

impl PostgresJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduler_jobs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                schedule TEXT NOT NULL DEFAULT '',
                payload TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                job_type TEXT NOT NULL,
                owner TEXT,
                next_run_time TIMESTAMPTZ,
                labels JSONB NOT NULL DEFAULT '{}'::jsonb,
                metadata JSONB NOT NULL DEFAULT 'null'::jsonb,
                last_run_id TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduler_job_runs (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES scheduler_jobs(id) ON DELETE CASCADE,
                started_at TIMESTAMPTZ NOT NULL,
                finished_at TIMESTAMPTZ,
                status TEXT NOT NULL,
                result TEXT,
                error TEXT,
                metadata JSONB NOT NULL DEFAULT 'null'::jsonb
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_scheduler_jobs_status ON scheduler_jobs(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_scheduler_job_runs_job ON scheduler_job_runs(job_id, started_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        info!("Scheduler schema ready");
        Ok(())
    }
}

fn job_from_row(row: &PgRow) -> Result<Job> {
    let status: String = row.try_get("status")?;
    let trigger_type: String = row.try_get("trigger_type")?;
    let job_type: String = row.try_get("job_type")?;
    let labels: Json<BTreeMap<String, String>> = row.try_get("labels")?;
    let metadata: Json<serde_json::Value> = row.try_get("metadata")?;

    Ok(Job {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        schedule: row.try_get("schedule")?,
        payload: row.try_get("payload")?,
        status: status.parse()?,
        trigger_type: trigger_type.parse()?,
        job_type: job_type.parse()?,
        owner: row.try_get("owner")?,
        next_run_time: row.try_get::<Option<DateTime<Utc>>, _>("next_run_time")?,
        labels: labels.0,
        metadata: metadata.0,
        last_run_id: row.try_get("last_run_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn run_from_row(row: &PgRow) -> Result<JobRun> {
    let status: String = row.try_get("status")?;
    let metadata: Json<serde_json::Value> = row.try_get("metadata")?;

    Ok(JobRun {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        status: status.parse()?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        metadata: metadata.0,
    })
}

#[async_trait]
impl JobRepository for PostgresJobRepository {
    async fn create_job(&self, job: Job) -> Result<Job> {
        job.validate()?;
        sqlx::query(&format!(
            "INSERT INTO scheduler_jobs ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            JOB_COLUMNS
        ))
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.schedule)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.trigger_type.as_str())
        .bind(job.job_type.as_str())
        .bind(&job.owner)
        .bind(job.next_run_time)
        .bind(Json(&job.labels))
        .bind(Json(&job.metadata))
        .bind(&job.last_run_id)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(job)
    }

    async fn update_job(&self, job: Job) -> Result<Job> {
        job.validate()?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE scheduler_jobs
            SET name = $2, schedule = $3, payload = $4, status = $5, trigger_type = $6, job_type = $7,
                owner = $8, next_run_time = $9, labels = $10, metadata = $11, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.schedule)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.trigger_type.as_str())
        .bind(job.job_type.as_str())
        .bind(&job.owner)
        .bind(job.next_run_time)
        .bind(Json(&job.labels))
        .bind(Json(&job.metadata))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SchedulerError::NotFound { id: job.id.clone() })?;
        job_from_row(&row)
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM scheduler_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::NotFound { id: job_id.to_string() });
        }
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Job> {
        let row = sqlx::query(&format!("SELECT {} FROM scheduler_jobs WHERE id = $1", JOB_COLUMNS))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| SchedulerError::NotFound { id: job_id.to_string() })?;
        job_from_row(&row)
    }

    async fn list_jobs(&self, page: u32, page_size: u32, status: Option<JobStatus>) -> Result<Page<Job>> {
        let pagination = Pagination::new(page, page_size);
        let status = status.map(|s| s.as_str());

        let rows = sqlx::query(&format!(
            "SELECT {} FROM scheduler_jobs WHERE ($1::TEXT IS NULL OR status = $1) \
             ORDER BY created_at DESC, id LIMIT $2 OFFSET $3",
            JOB_COLUMNS
        ))
        .bind(status)
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scheduler_jobs WHERE ($1::TEXT IS NULL OR status = $1)")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;

        Ok(Page {
            items: rows.iter().map(job_from_row).collect::<Result<Vec<_>>>()?,
            total: total as u64,
            page: pagination.page,
            page_size: pagination.page_size,
        })
    }

    async fn run_job(&self, job_id: &str) -> Result<JobRun> {
        let job = self.get_job(job_id).await?;
        if !job.is_runnable() {
            return Err(SchedulerError::NotRunnable { id: job.id, status: job.status });
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
            metadata: job.metadata,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO scheduler_job_runs ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            RUN_COLUMNS
        ))
        .bind(&run.id)
        .bind(&run.job_id)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.status.as_str())
        .bind(&run.result)
        .bind(&run.error)
        .bind(Json(&run.metadata))
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE scheduler_jobs SET last_run_id = $1, updated_at = $2 WHERE id = $3")
            .bind(&run.id)
            .bind(now)
            .bind(&run.job_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(run)
    }

    async fn list_job_runs(&self, job_id: &str, page: u32, page_size: u32) -> Result<Page<JobRun>> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM scheduler_jobs WHERE id = $1)")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(SchedulerError::NotFound { id: job_id.to_string() });
        }

        let pagination = Pagination::new(page, page_size);

        let rows = sqlx::query(&format!(
            "SELECT {} FROM scheduler_job_runs WHERE job_id = $1 ORDER BY started_at DESC, id LIMIT $2 OFFSET $3",
            RUN_COLUMNS
        ))
        .bind(job_id)
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scheduler_job_runs WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(Page {
            items: rows.iter().map(run_from_row).collect::<Result<Vec<_>>>()?,
            total: total as u64,
            page: pagination.page,
            page_size: pagination.page_size,
        })
    }
}
