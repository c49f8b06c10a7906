//! Orchestration ledger
//!
//! `trace` is append-only and may grow without bound; `state` is a single
//! overwritten value for O(1) reads. The two are independent: recording an
//! event never changes state and updating state never appends.
//!
//! No locking happens here. The caller owns the envelope for the duration of
//! a request.

use serde_json::{json, Map, Value};
use tracing::warn;

use orca_common::orchestration_state;

use crate::envelope::Metadata;
use crate::event::OrchestrationEvent;
use crate::{LedgerError, Result};

/// Domain section holding the `cron` / `interval` expression of an entity.
pub const SCHEDULING_SECTION: &str = "scheduling";

// ============================================================================
// Primitives
// ============================================================================

/// Append `event` to `service_specific.<domain>.trace`.
pub fn record_event(meta: &mut Metadata, domain: &str, event: OrchestrationEvent) -> Result<()> {
    meta.domain_mut(domain)?.push_event(event);
    Ok(())
}

/// Events recorded for `domain`, oldest first. Empty if the domain (or the
/// whole `service_specific` section) does not exist yet.
pub fn extract_trace<'a>(meta: &'a Metadata, domain: &str) -> &'a [OrchestrationEvent] {
    meta.domain(domain).map(|d| d.trace()).unwrap_or(&[])
}

/// Overwrite `service_specific.<domain>.state`.
pub fn update_state(meta: &mut Metadata, domain: &str, state: impl Into<String>) -> Result<()> {
    meta.domain_mut(domain)?.set_state(state.into());
    Ok(())
}

pub fn current_state<'a>(meta: &'a Metadata, domain: &str) -> Option<&'a str> {
    meta.domain(domain).and_then(|d| d.state())
}

// ============================================================================
// Cross-service helpers
// ============================================================================

/// New envelope with one trace entry and the matching state. The entry point
/// for handlers creating an entity.
pub fn automate_orchestration(
    service: &str,
    action: &str,
    details: Map<String, Value>,
    state: &str,
) -> Metadata {
    let mut meta = Metadata::new();
    let section = meta.ensure_service_specific().section_mut(service);
    section.push_event(OrchestrationEvent::new(service, action, details, state));
    section.set_state(state.to_string());
    meta
}

/// As [`automate_orchestration`], tagged with `user:<id>` and `session:<id>`.
pub fn automate_orchestration_with_user(
    service: &str,
    action: &str,
    details: Map<String, Value>,
    state: &str,
    user_id: &str,
    session_id: &str,
) -> Metadata {
    let mut meta = automate_orchestration(service, action, details, state);
    meta.add_tag(format!("user:{}", user_id));
    meta.add_tag(format!("session:{}", session_id));
    meta
}

/// Record a hand-off from `from` to `to` on the receiving domain's trace and
/// tag the envelope with the correlation id.
pub fn log_cross_service_event(
    meta: &mut Metadata,
    from: &str,
    to: &str,
    action: &str,
    correlation_id: &str,
    details: Map<String, Value>,
) -> Result<()> {
    let event = OrchestrationEvent::new(
        format!("{}->{}", from, to),
        action,
        details,
        orchestration_state::CROSS_SERVICE,
    );
    record_event(meta, to, event)?;
    meta.add_tag(format!("correlation:{}", correlation_id));
    Ok(())
}

/// `service_specific.scheduling.cron`, falling back to `.interval`.
pub fn extract_schedule(meta: &Metadata) -> Result<String> {
    if !meta.has_service_specific() {
        return Err(LedgerError::MissingServiceSpecific);
    }
    let section = meta
        .domain(SCHEDULING_SECTION)
        .ok_or_else(|| LedgerError::NoSchedule("no scheduling section in metadata".into()))?;

    ["cron", "interval"]
        .iter()
        .filter_map(|key| section.extension(key).and_then(Value::as_str))
        .find(|expr| !expr.is_empty())
        .map(str::to_string)
        .ok_or_else(|| LedgerError::NoSchedule("no cron or interval found in scheduling metadata".into()))
}

pub fn has_schedule(meta: &Metadata) -> bool {
    extract_schedule(meta).is_ok()
}

/// Store `value` under `service_specific.<domain>.performance_metrics.<metric>`.
pub fn record_performance_metric(meta: &mut Metadata, domain: &str, metric: &str, value: Value) -> Result<()> {
    let metrics = meta.domain_mut(domain)?.extension_mut("performance_metrics");
    if !metrics.is_object() {
        if !metrics.is_null() {
            warn!(domain, "performance_metrics was not an object, replacing it");
        }
        *metrics = Value::Object(Map::new());
    }
    if let Value::Object(map) = metrics {
        map.insert(metric.to_string(), value);
    }
    Ok(())
}

/// Replace the UI state machine snapshot of a domain.
pub fn update_state_machine(
    meta: &mut Metadata,
    domain: &str,
    current: &str,
    transitions: &[&str],
    context: Map<String, Value>,
) -> Result<()> {
    *meta.domain_mut(domain)?.extension_mut("state_machine") = json!({
        "current": current,
        "transitions": transitions,
        "context": context,
    });
    Ok(())
}
