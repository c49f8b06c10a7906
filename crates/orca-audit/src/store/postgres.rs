use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;

use super::AuditStore;
use crate::entry::{AuditEntry, AuditRecord, GENESIS_PREV_HASH};
use crate::Result;

/// Advisory lock key shared by every writer of the `audit_log` chain.
const AUDIT_CHAIN_LOCK: i64 = 0x4f52_4341_4155_4454;

/// Chain stored in `audit_log`, ordered by `seq`.
///
/// Appends run in a transaction holding `pg_advisory_xact_lock`, so writers
/// in different processes are serialised as well.
pub struct PostgresAuditStore {
    pool: PgPool,
}

impl PostgresAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                seq BIGSERIAL PRIMARY KEY,
                timestamp TIMESTAMPTZ NOT NULL,
                action TEXT NOT NULL,
                actor TEXT NOT NULL,
                result TEXT NOT NULL,
                details JSONB NOT NULL DEFAULT 'null'::jsonb,
                prev_hash TEXT NOT NULL,
                entry_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_log_actor ON audit_log(actor)")
            .execute(&self.pool)
            .await?;

        info!("Audit schema ready");
        Ok(())
    }

    /// Entries written by `actor`, oldest first. Not verifiable on its own.
    pub async fn list_by_actor(&self, actor: &str, limit: i64) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, action, actor, result, details, prev_hash, entry_hash
            FROM audit_log WHERE actor = $1 ORDER BY seq ASC LIMIT $2
            "#,
        )
        .bind(actor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }
}

fn entry_from_row(row: &PgRow) -> Result<AuditEntry> {
    let timestamp: DateTime<Utc> = row.try_get("timestamp")?;
    let details: Json<serde_json::Value> = row.try_get("details")?;
    Ok(AuditEntry {
        record: AuditRecord {
            timestamp,
            action: row.try_get("action")?,
            actor: row.try_get("actor")?,
            result: row.try_get("result")?,
            details: details.0,
        },
        prev_hash: row.try_get("prev_hash")?,
        entry_hash: row.try_get("entry_hash")?,
    })
}

#[async_trait]
impl AuditStore for PostgresAuditStore {
    async fn append(&self, record: AuditRecord) -> Result<AuditEntry> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(AUDIT_CHAIN_LOCK)
            .execute(&mut *tx)
            .await?;

        let head: Option<String> =
            sqlx::query_scalar("SELECT entry_hash FROM audit_log ORDER BY seq DESC LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?;

        let entry = AuditEntry::chain(record, head.unwrap_or_else(|| GENESIS_PREV_HASH.to_string()));

        sqlx::query(
            r#"
            INSERT INTO audit_log (timestamp, action, actor, result, details, prev_hash, entry_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.record.timestamp)
        .bind(&entry.record.action)
        .bind(&entry.record.actor)
        .bind(&entry.record.result)
        .bind(Json(&entry.record.details))
        .bind(&entry.prev_hash)
        .bind(&entry.entry_hash)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(entry)
    }

    async fn latest_hash(&self) -> Result<Option<String>> {
        let head = sqlx::query_scalar("SELECT entry_hash FROM audit_log ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(head)
    }

    async fn list_all(&self) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT timestamp, action, actor, result, details, prev_hash, entry_hash \
             FROM audit_log ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
