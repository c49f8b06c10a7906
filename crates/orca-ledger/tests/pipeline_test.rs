//! Stock stages wired against in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map};

use orca_common::{Cache, Container, InMemoryCache, OrcaError};
use orca_ledger::stages::standard_pipeline;
use orca_ledger::{
    automate_orchestration, extract_trace, Diagnostics, GraphClient, GraphUpdate, Registration, ServiceRegistrar,
    StageContext,
};
use orca_scheduler::{InMemoryJobRepository, JobRepository, SchedulerClient, TriggerType};

struct DownGraph;

#[async_trait]
impl GraphClient for DownGraph {
    async fn publish_update(&self, _update: GraphUpdate) -> orca_common::Result<()> {
        Err(OrcaError::Bus("graph service unavailable".into()))
    }
}

#[derive(Default)]
struct RecordingRegistrar {
    seen: Mutex<Vec<Registration>>,
}

#[async_trait]
impl ServiceRegistrar for RecordingRegistrar {
    async fn register(&self, registration: Registration) -> orca_common::Result<()> {
        self.seen.lock().push(registration);
        Ok(())
    }
}

struct Fixture {
    container: Container,
    cache: Arc<InMemoryCache>,
    jobs: Arc<InMemoryJobRepository>,
    registrar: Arc<RecordingRegistrar>,
}

fn fixture() -> Fixture {
    let container = Container::new();
    let jobs = Arc::new(InMemoryJobRepository::new());
    let registrar = Arc::new(RecordingRegistrar::default());
    container.register::<dyn SchedulerClient>(jobs.clone());
    container.register::<dyn GraphClient>(Arc::new(DownGraph));
    container.register::<dyn ServiceRegistrar>(registrar.clone());
    Fixture {
        container,
        cache: Arc::new(InMemoryCache::new()),
        jobs,
        registrar,
    }
}

#[tokio::test]
async fn test_primary_result_survives_collaborator_failures() {
    let fx = fixture();
    let diagnostics = Arc::new(Diagnostics::default());
    let pipeline = standard_pipeline(fx.cache.clone(), Duration::from_secs(60)).with_sink(diagnostics.clone());
    assert_eq!(pipeline.stage_names(), vec!["cache", "schedule", "graph_enrich", "register"]);

    let mut meta = automate_orchestration("content", "create_content", Map::new(), "pending");
    meta.domain_mut("scheduling")
        .unwrap()
        .set_extension("cron", json!("0 6 * * *"))
        .unwrap();

    let ctx = StageContext {
        domain: "content",
        entity_type: "article",
        entity_id: "a-42",
        resolver: &fx.container,
    };
    let report = pipeline.run(&ctx, &mut meta).await;

    assert_eq!(report.completed, vec!["cache", "schedule", "register"]);
    assert!(report.failed("graph_enrich"));
    assert_eq!(diagnostics.failures()[0].stage, "graph_enrich");

    let actions: Vec<&str> = extract_trace(&meta, "content").iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["create_content", "cache", "schedule", "register"]);

    let cached = fx.cache.get("article:a-42").await.unwrap().unwrap();
    assert_eq!(cached["service_specific"]["scheduling"]["cron"], "0 6 * * *");

    let jobs = fx.jobs.list_jobs(1, 10, None).await.unwrap();
    assert_eq!(jobs.total, 1);
    assert_eq!(jobs.items[0].name, "a-42");
    assert_eq!(jobs.items[0].schedule, "0 6 * * *");
    assert_eq!(jobs.items[0].trigger_type, TriggerType::Cron);

    assert_eq!(fx.registrar.seen.lock()[0].entity_id, "a-42");
}

#[tokio::test]
async fn test_unscheduled_entity_skips_schedule_stage() {
    let fx = fixture();
    let pipeline = standard_pipeline(fx.cache.clone(), Duration::from_secs(60));
    let mut meta = automate_orchestration("content", "create_content", Map::new(), "pending");

    let ctx = StageContext {
        domain: "content",
        entity_type: "article",
        entity_id: "a-43",
        resolver: &fx.container,
    };
    let report = pipeline.run(&ctx, &mut meta).await;

    assert_eq!(report.skipped, vec!["schedule"]);
    assert_eq!(fx.jobs.job_count(), 0);
}

#[tokio::test]
async fn test_unregistered_collaborator_is_captured() {
    let container = Container::new();
    let cache = Arc::new(InMemoryCache::new());
    let pipeline = standard_pipeline(cache, Duration::from_secs(60));
    let mut meta = automate_orchestration("content", "create_content", Map::new(), "pending");

    let ctx = StageContext {
        domain: "content",
        entity_type: "article",
        entity_id: "a-44",
        resolver: &container,
    };
    let report = pipeline.run(&ctx, &mut meta).await;

    assert_eq!(report.completed, vec!["cache"]);
    assert!(report.failed("graph_enrich"));
    assert!(report.failed("register"));
}
