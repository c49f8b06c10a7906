//! Audit persistence.
//!
//! `append` must read the chain head, hash the record onto it and persist the
//! entry as one atomic step with respect to every other append on the same
//! chain, otherwise two writers can link onto the same head and fork it.

mod memory;
mod postgres;

pub use memory::InMemoryAuditStore;
pub use postgres::PostgresAuditStore;

use async_trait::async_trait;

use crate::entry::{AuditEntry, AuditRecord};
use crate::Result;

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Link `record` onto the current head and persist it.
    async fn append(&self, record: AuditRecord) -> Result<AuditEntry>;

    /// `entry_hash` of the most recently written entry.
    async fn latest_hash(&self) -> Result<Option<String>>;

    /// Every entry in write order.
    async fn list_all(&self) -> Result<Vec<AuditEntry>>;

    async fn count(&self) -> Result<u64>;
}
