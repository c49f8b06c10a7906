//! Operational endpoints: liveness, readiness, Prometheus metrics and recent
//! orchestration stage failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;

use orca_ledger::Diagnostics;
use orca_taxonomy::TaxonomyRegistry;

#[derive(Clone)]
pub struct AppState {
    pub prometheus: PrometheusHandle,
    pub registry: Arc<TaxonomyRegistry>,
    pub diagnostics: Arc<Diagnostics>,
    /// Set once listeners and subscriptions are running.
    pub ready: Arc<AtomicBool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/diagnostics", get(diagnostics_handler))
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "UP" }))
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.ready.load(Ordering::SeqCst) && state.registry.is_built();
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(json!({ "ready": ready })))
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.prometheus.render()
}

async fn diagnostics_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let failures = state.diagnostics.failures();
    Json(json!({
        "count": failures.len(),
        "failures": failures,
    }))
}
