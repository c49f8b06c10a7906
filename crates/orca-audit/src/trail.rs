use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chain::{verify_chain, ChainReport};
use crate::entry::AuditRecord;
use crate::store::AuditStore;
use crate::Result;

/// Append/verify entry point over an [`AuditStore`].
///
/// Appends from this process queue behind one lock before reaching the
/// store. The chain is global, so this lock is the throughput ceiling for
/// audit writes.
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
    append_lock: Mutex<()>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            append_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Append `record` and return its `entry_hash`.
    pub async fn append(&self, record: AuditRecord) -> Result<String> {
        record.validate()?;

        let _guard = self.append_lock.lock().await;
        let entry = self.store.append(record).await?;

        debug!(
            action = %entry.record.action,
            actor = %entry.record.actor,
            entry_hash = %entry.entry_hash,
            "Audit entry appended"
        );
        metrics::counter!("orca_audit_appends_total", "action" => entry.record.action.clone()).increment(1);
        Ok(entry.entry_hash)
    }

    /// Replay the whole stream. Integrity failures are reported, never raised.
    pub async fn verify(&self) -> Result<ChainReport> {
        let entries = self.store.list_all().await?;
        let report = verify_chain(&entries);

        if report.is_intact() {
            info!(entries = report.total, "Audit chain verified");
        } else {
            warn!(
                entries = report.total,
                compromised = ?report.compromised,
                "Audit chain integrity check failed"
            );
            metrics::gauge!("orca_audit_compromised_entries").set(report.compromised.len() as f64);
        }
        Ok(report)
    }
}
