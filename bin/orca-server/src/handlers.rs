//! Action handlers hosted by the server.
//!
//! Every registered action of a hosted domain runs the best-effort
//! orchestration pipeline over the event envelope and answers with the
//! `success` event. `security:audit_event` appends to the audit trail instead.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use orca_audit::{AuditRecord, AuditTrail};
use orca_common::{orchestration_state, Container};
use orca_dispatch::{ActionHandler, BusEvent, DispatchError, DispatchRouter, EventBus};
use orca_ledger::{details, record_event, update_state, BestEffortPipeline, Metadata, OrchestrationEvent, StageContext};
use orca_taxonomy::{CanonicalEventName, TaxonomyRegistry};

pub const SECURITY_DOMAIN: &str = "security";
pub const AUDIT_EVENT_ACTION: &str = "audit_event";

/// Shared collaborators for the hosted handlers.
#[derive(Clone)]
pub struct HandlerDeps {
    pub bus: Arc<dyn EventBus>,
    pub container: Arc<Container>,
    pub pipeline: Arc<BestEffortPipeline>,
    pub audit: Arc<AuditTrail>,
}

/// Register a handler for every action the taxonomy lists under each domain.
pub async fn register_domain_handlers(
    router: &DispatchRouter,
    registry: &TaxonomyRegistry,
    domains: &[String],
    deps: &HandlerDeps,
) -> anyhow::Result<usize> {
    let mut registered = 0;
    for domain in domains {
        let actions = registry.actions(domain).await?;
        if actions.is_empty() {
            warn!(domain = %domain, "Hosted domain has no registered actions");
        }
        for action in actions {
            let handler: Arc<dyn ActionHandler> = if domain == SECURITY_DOMAIN && action == AUDIT_EVENT_ACTION {
                Arc::new(AuditEventHandler::new(deps.clone()))
            } else {
                Arc::new(OrchestrateHandler::new(domain.clone(), deps.clone()))
            };
            router.register_handler(domain, &action, handler);
            registered += 1;
        }
        info!(domain = %domain, "Domain handlers registered");
    }
    Ok(registered)
}

async fn publish_outcome(
    bus: &dyn EventBus,
    request: &CanonicalEventName,
    id: &str,
    meta: Metadata,
    state: &str,
) -> orca_dispatch::Result<()> {
    let event_type = request.with_state(state).to_string();
    debug!(event_type = %event_type, id = %id, "Publishing outcome");
    bus.publish(&event_type, id, meta).await
}

// ============================================================================
// Orchestrate
// ============================================================================

pub struct OrchestrateHandler {
    domain: String,
    deps: HandlerDeps,
}

impl OrchestrateHandler {
    pub fn new(domain: impl Into<String>, deps: HandlerDeps) -> Self {
        Self {
            domain: domain.into(),
            deps,
        }
    }
}

#[async_trait]
impl ActionHandler for OrchestrateHandler {
    async fn handle(&self, event: &BusEvent) -> orca_dispatch::Result<()> {
        let request = CanonicalEventName::parse(&event.event_type)?;
        let mut meta = event.metadata.clone();
        meta.ensure_service_specific();

        record_event(
            &mut meta,
            &self.domain,
            OrchestrationEvent::new(&self.domain, request.action(), Map::new(), orchestration_state::RUNNING),
        )?;
        update_state(&mut meta, &self.domain, orchestration_state::RUNNING)?;

        let ctx = StageContext {
            domain: &self.domain,
            entity_type: &self.domain,
            entity_id: &event.id,
            resolver: &self.deps.container,
        };
        let report = self.deps.pipeline.run(&ctx, &mut meta).await;
        if !report.is_clean() {
            warn!(
                domain = %self.domain,
                entity_id = %event.id,
                failures = report.failures.len(),
                "Orchestration stages failed"
            );
        }

        update_state(&mut meta, &self.domain, orchestration_state::COMPLETED)?;
        publish_outcome(self.deps.bus.as_ref(), &request, &event.id, meta, orca_common::STATE_SUCCESS).await
    }
}

// ============================================================================
// Audit
// ============================================================================

/// Appends the request to the audit chain. Reads `actor`, `audit_action`,
/// `result` and `details` from the envelope's top-level fields.
pub struct AuditEventHandler {
    deps: HandlerDeps,
}

impl AuditEventHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    fn record_from(meta: &Metadata, fallback_action: &str) -> AuditRecord {
        let field = |key: &str| meta.fields.get(key).and_then(Value::as_str);
        AuditRecord::new(
            field("audit_action").unwrap_or(fallback_action),
            field("actor").unwrap_or("system"),
            field("result").unwrap_or("success"),
            meta.fields.get("details").cloned().unwrap_or(Value::Null),
        )
    }
}

#[async_trait]
impl ActionHandler for AuditEventHandler {
    async fn handle(&self, event: &BusEvent) -> orca_dispatch::Result<()> {
        let request = CanonicalEventName::parse(&event.event_type)?;
        let record = Self::record_from(&event.metadata, request.action());

        let entry_hash = self
            .deps
            .audit
            .append(record)
            .await
            .map_err(|e| DispatchError::handler(e.to_string()))?;

        let mut meta = event.metadata.clone();
        meta.ensure_service_specific();
        record_event(
            &mut meta,
            SECURITY_DOMAIN,
            OrchestrationEvent::new(
                SECURITY_DOMAIN,
                AUDIT_EVENT_ACTION,
                details([("entry_hash", json!(entry_hash))]),
                orchestration_state::COMPLETED,
            ),
        )?;
        update_state(&mut meta, SECURITY_DOMAIN, orchestration_state::COMPLETED)?;
        publish_outcome(self.deps.bus.as_ref(), &request, &event.id, meta, orca_common::STATE_SUCCESS).await
    }
}
