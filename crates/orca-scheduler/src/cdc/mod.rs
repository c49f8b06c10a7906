//! CDC Trigger Bridge
//!
//! Row changes on the shared `master` table are announced by a database
//! trigger through `pg_notify` on channel `cdc_master_<event_type>`. The bridge
//! keeps one dedicated listener connection per subscription (outside the
//! request pool) and feeds every notification payload to a handler.
//!
//! Ordering: notifications on one channel arrive in commit order and are
//! handled one at a time. Nothing is ordered across channels.

mod bridge;
mod deriver;
mod notify;

pub use bridge::{handler_fn, CdcBridge, CdcHandler, CdcSubscription, ReconnectPolicy};
pub use deriver::{CdcJobDeriver, CdcNotification};
pub use notify::{
    ChannelNotificationSource, Notification, NotificationSource, NotificationStream, PgNotificationSource,
};

use serde::{Deserialize, Serialize};

use crate::{Result, SchedulerError};

/// The only table CDC triggers may be attached to.
pub const MASTER_TABLE: &str = "master";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CdcTrigger {
    table: String,
    event_type: String,
}

impl CdcTrigger {
    /// Rejects any table other than `master` and event types outside `[a-z0-9_]+`.
    pub fn new(table: impl Into<String>, event_type: impl Into<String>) -> Result<Self> {
        let table = table.into();
        let event_type = event_type.into();

        if table != MASTER_TABLE {
            return Err(SchedulerError::configuration(format!(
                "invalid CDC trigger: only the '{}' table is supported, got '{}'",
                MASTER_TABLE, table
            )));
        }
        if event_type.is_empty() {
            return Err(SchedulerError::configuration("invalid CDC trigger: event_type is required"));
        }
        if !event_type.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_') {
            return Err(SchedulerError::configuration(format!(
                "invalid CDC trigger: event_type '{}' must match [a-z0-9_]+",
                event_type
            )));
        }

        Ok(Self { table, event_type })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// `cdc_<table>_<event_type>`
    pub fn channel(&self) -> String {
        format!("cdc_{}_{}", self.table, self.event_type)
    }
}

/// DDL installing the notify trigger for a row-level operation on `master`.
/// Only `insert`, `update` and `delete` map to trigger events.
pub fn install_cdc_trigger_sql(trigger: &CdcTrigger) -> Result<String> {
    let (operation, row) = match trigger.event_type() {
        "insert" => ("INSERT", "NEW"),
        "update" => ("UPDATE", "NEW"),
        "delete" => ("DELETE", "OLD"),
        other => {
            return Err(SchedulerError::configuration(format!(
                "no row operation for CDC event_type '{}'",
                other
            )))
        }
    };

    let channel = trigger.channel();
    let function = format!("orca_notify_{}", channel);
    Ok(format!(
        r#"CREATE OR REPLACE FUNCTION {function}() RETURNS trigger AS $$
BEGIN
    PERFORM pg_notify('{channel}', json_build_object('id', {row}.id, 'event_type', '{event_type}')::text);
    RETURN {row};
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS {channel}_trigger ON {table};

CREATE TRIGGER {channel}_trigger
    AFTER {operation} ON {table}
    FOR EACH ROW EXECUTE FUNCTION {function}();
"#,
        function = function,
        channel = channel,
        row = row,
        event_type = trigger.event_type(),
        table = trigger.table(),
        operation = operation,
    ))
}
