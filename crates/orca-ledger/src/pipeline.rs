//! Best-effort orchestration stages
//!
//! Side effects that follow a primary mutation (caching, scheduling, graph
//! enrichment, cross-service registration) must never fail that mutation.
//! Each stage runs independently; a failed stage is logged, counted and
//! captured as a [`StageFailure`] while the remaining stages still run.
//!
//! A stage that completes records an orchestration event named after itself
//! with state `completed` on the entity's domain trace.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use orca_common::{orchestration_state, Container};

use crate::envelope::Metadata;
use crate::event::OrchestrationEvent;
use crate::ledger::record_event;
use crate::Result;

/// What a stage is operating on.
pub struct StageContext<'a> {
    pub domain: &'a str,
    pub entity_type: &'a str,
    pub entity_id: &'a str,
    pub resolver: &'a Container,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Done; details go into the recorded orchestration event.
    Completed(Map<String, Value>),
    /// Nothing to do for this entity.
    Skipped(String),
}

#[async_trait]
pub trait Stage: Send + Sync {
    /// Also the action name of the orchestration event recorded on success.
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &StageContext<'_>, meta: &Metadata) -> Result<StageOutcome>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFailure {
    pub stage: &'static str,
    pub domain: String,
    pub entity_id: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Where stage failures go besides the log.
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, failure: StageFailure);
}

/// Keeps the most recent failures in memory.
pub struct Diagnostics {
    capacity: usize,
    failures: Mutex<VecDeque<StageFailure>>,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    pub fn failures(&self) -> Vec<StageFailure> {
        self.failures.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.failures.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.lock().is_empty()
    }

    pub fn clear(&self) {
        self.failures.lock().clear();
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl DiagnosticsSink for Diagnostics {
    fn record(&self, failure: StageFailure) {
        let mut failures = self.failures.lock();
        if failures.len() >= self.capacity {
            failures.pop_front();
        }
        failures.push_back(failure);
    }
}

/// Result of one pipeline run.
#[derive(Debug, Default, Clone)]
pub struct PipelineReport {
    pub completed: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
    pub failures: Vec<StageFailure>,
}

impl PipelineReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, stage: &str) -> bool {
        self.failures.iter().any(|f| f.stage == stage)
    }
}

#[derive(Default)]
pub struct BestEffortPipeline {
    stages: Vec<Arc<dyn Stage>>,
    sink: Option<Arc<dyn DiagnosticsSink>>,
}

impl BestEffortPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order. Never fails.
    pub async fn run(&self, ctx: &StageContext<'_>, meta: &mut Metadata) -> PipelineReport {
        let mut report = PipelineReport::default();

        for stage in &self.stages {
            let name = stage.name();
            let outcome = stage.run(ctx, meta).await.and_then(|outcome| {
                if let StageOutcome::Completed(details) = &outcome {
                    let event = OrchestrationEvent::new(
                        ctx.domain,
                        name,
                        details.clone(),
                        orchestration_state::COMPLETED,
                    );
                    record_event(meta, ctx.domain, event)?;
                }
                Ok(outcome)
            });

            match outcome {
                Ok(StageOutcome::Completed(_)) => {
                    debug!(stage = name, domain = %ctx.domain, entity_id = %ctx.entity_id, "Stage completed");
                    metrics::counter!("orca_stage_total", "stage" => name, "outcome" => "completed").increment(1);
                    report.completed.push(name);
                }
                Ok(StageOutcome::Skipped(reason)) => {
                    debug!(stage = name, domain = %ctx.domain, reason = %reason, "Stage skipped");
                    metrics::counter!("orca_stage_total", "stage" => name, "outcome" => "skipped").increment(1);
                    report.skipped.push(name);
                }
                Err(e) => {
                    warn!(
                        stage = name,
                        domain = %ctx.domain,
                        entity_id = %ctx.entity_id,
                        error = %e,
                        "Stage failed"
                    );
                    metrics::counter!("orca_stage_total", "stage" => name, "outcome" => "failed").increment(1);
                    let failure = StageFailure {
                        stage: name,
                        domain: ctx.domain.to_string(),
                        entity_id: ctx.entity_id.to_string(),
                        error: e.to_string(),
                        at: Utc::now(),
                    };
                    if let Some(sink) = &self.sink {
                        sink.record(failure.clone());
                    }
                    report.failures.push(failure);
                }
            }
        }

        report
    }
}
