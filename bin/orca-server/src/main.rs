//! Orca Server
//!
//! Composition root for the orchestration substrate:
//! - Event taxonomy built from the service registration file
//! - Action dispatchers and bus listeners for the hosted domains
//! - CDC bridge deriving jobs from `master` row changes
//! - Hash-chained audit trail (verified at startup)
//! - Health, readiness and Prometheus endpoints

mod collaborators;
mod handlers;
mod http;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use orca_audit::{AuditStore, AuditTrail, InMemoryAuditStore, PostgresAuditStore};
use orca_common::logging::init_tracing;
use orca_common::{Cache, Container, InMemoryCache, RedisCache};
use orca_config::{AuditBackend, OrcaConfig};
use orca_dispatch::{BusListener, DispatchRouter, InMemoryEventBus};
use orca_ledger::stages::standard_pipeline;
use orca_ledger::{Diagnostics, GraphClient, ServiceRegistrar};
use orca_scheduler::cdc::{install_cdc_trigger_sql, PgNotificationSource};
use orca_scheduler::{
    CdcBridge, CdcJobDeriver, CdcSubscription, CdcTrigger, InMemoryJobRepository, JobRepository,
    PostgresJobRepository, ReconnectPolicy, SchedulerClient,
};
use orca_taxonomy::{JsonRegistrationSource, TaxonomyRegistry};

use crate::collaborators::{BusGraphClient, BusRegistrar};
use crate::handlers::{register_domain_handlers, HandlerDeps};

/// Orca orchestration server
#[derive(Parser, Debug)]
#[command(name = "orca-server")]
#[command(about = "Event orchestration server - dispatch, CDC bridge and audit trail")]
struct Args {
    /// Path to orca.toml (defaults plus ORCA_* variables when omitted)
    #[arg(long, short, env = "ORCA_CONFIG")]
    config: Option<PathBuf>,

    /// Override server.http_port
    #[arg(long)]
    http_port: Option<u16>,

    /// Print the pg_notify trigger DDL for the configured CDC triggers and exit
    #[arg(long, default_value = "false")]
    print_cdc_sql: bool,

    /// Event bus buffer per subscriber
    #[arg(long, env = "ORCA_BUS_CAPACITY", default_value = "1024")]
    bus_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => OrcaConfig::load(path)?,
        None => OrcaConfig::from_env()?,
    };
    if let Some(port) = args.http_port {
        config.server.http_port = port;
    }

    init_tracing(&config.logging.level, config.logging.json);

    let triggers = config
        .cdc
        .triggers
        .iter()
        .map(|t| CdcTrigger::new(&t.table, &t.event_type))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("invalid CDC trigger configuration")?;

    if args.print_cdc_sql {
        for trigger in &triggers {
            println!("{}", install_cdc_trigger_sql(trigger)?);
        }
        return Ok(());
    }

    info!("Starting Orca server");
    info!(
        http_port = config.server.http_port,
        domains = ?config.server.domains,
        cdc_enabled = config.cdc.enabled,
        "Configuration"
    );

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    // 1. Database pool (optional)
    let pool = match &config.database.url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(url)
                .await
                .context("failed to connect to Postgres")?;
            info!("Connected to Postgres");
            Some(pool)
        }
        None => None,
    };

    // 2. Event taxonomy; a broken registration file stops startup
    let registry = Arc::new(TaxonomyRegistry::new(Arc::new(JsonRegistrationSource::from_path(
        &config.registry.path,
    ))));
    registry.ensure_built().await.context("failed to build event taxonomy")?;

    // 3. Collaborators
    let bus = Arc::new(InMemoryEventBus::new(args.bus_capacity));
    let (jobs, scheduler) = create_job_repository(pool.as_ref()).await?;
    let cache = create_cache(&config).await;
    let audit = Arc::new(AuditTrail::new(create_audit_store(&config, pool.as_ref()).await?));

    if config.audit.verify_on_startup {
        let report = audit.verify().await?;
        if !report.is_intact() {
            error!(compromised = ?report.compromised, "Audit chain is compromised, continuing append-only");
        }
    }

    let container = Arc::new(Container::new());
    container.register::<dyn SchedulerClient>(scheduler);
    container.register::<dyn GraphClient>(Arc::new(BusGraphClient::new(bus.clone())));
    container.register::<dyn ServiceRegistrar>(Arc::new(BusRegistrar::new(bus.clone())));

    let diagnostics = Arc::new(Diagnostics::default());
    let pipeline = standard_pipeline(cache, Duration::from_secs(config.redis.default_ttl_secs))
        .with_sink(diagnostics.clone());

    // 4. Dispatchers and bus listeners
    let router = DispatchRouter::new(registry.clone());
    let deps = HandlerDeps {
        bus: bus.clone(),
        container,
        pipeline: Arc::new(pipeline),
        audit,
    };
    let handler_count = register_domain_handlers(&router, &registry, &config.server.domains, &deps).await?;
    info!(handlers = handler_count, "Action handlers registered");

    let listener = BusListener::start(bus.clone(), &router).await?;

    // 5. CDC bridge
    let mut subscriptions: Vec<CdcSubscription> = Vec::new();
    if config.cdc.enabled {
        let dsn = config
            .database
            .url
            .clone()
            .context("cdc.enabled requires database.url")?;
        let policy = ReconnectPolicy::new(
            Duration::from_secs(config.cdc.min_reconnect_secs),
            Duration::from_secs(config.cdc.max_reconnect_secs),
        );
        let bridge = CdcBridge::with_policy(Arc::new(PgNotificationSource::new(dsn)), policy);

        for trigger in triggers {
            let deriver = Arc::new(CdcJobDeriver::new(trigger.clone(), jobs.clone()).with_owner("cdc"));
            subscriptions.push(bridge.subscribe(trigger, deriver).await?);
        }
        info!(channels = subscriptions.len(), "CDC bridge started");
    } else if !triggers.is_empty() {
        warn!(triggers = triggers.len(), "CDC triggers configured but cdc.enabled is false");
    }

    // 6. HTTP endpoints
    let ready = Arc::new(AtomicBool::new(true));
    let app = http::router(http::AppState {
        prometheus,
        registry: registry.clone(),
        diagnostics,
        ready: ready.clone(),
    });

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let addr = format!("0.0.0.0:{}", config.server.http_port);
    let tcp = TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {}", addr))?;
    info!("HTTP server listening on http://{}", addr);

    let http_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let server = axum::serve(tcp, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            });
            if let Err(e) = server.await {
                error!("HTTP server error: {}", e);
            }
        })
    };

    info!("Orca server started. Press Ctrl+C to shutdown.");
    shutdown_signal().await;
    info!("Shutdown signal received...");
    ready.store(false, Ordering::SeqCst);

    let _ = shutdown_tx.send(());
    listener.shutdown().await;
    for subscription in subscriptions {
        subscription.cancel().await;
    }

    if tokio::time::timeout(Duration::from_secs(30), http_handle).await.is_err() {
        warn!("HTTP server did not stop within 30s");
    }

    info!("Orca server shutdown complete");
    Ok(())
}

async fn create_job_repository(
    pool: Option<&PgPool>,
) -> Result<(Arc<dyn JobRepository>, Arc<dyn SchedulerClient>)> {
    match pool {
        Some(pool) => {
            let repo = Arc::new(PostgresJobRepository::new(pool.clone()));
            repo.init_schema().await?;
            info!("Using Postgres job repository");
            let jobs: Arc<dyn JobRepository> = repo.clone();
            let scheduler: Arc<dyn SchedulerClient> = repo;
            Ok((jobs, scheduler))
        }
        None => {
            let repo = Arc::new(InMemoryJobRepository::new());
            info!("Using in-memory job repository");
            let jobs: Arc<dyn JobRepository> = repo.clone();
            let scheduler: Arc<dyn SchedulerClient> = repo;
            Ok((jobs, scheduler))
        }
    }
}

async fn create_cache(config: &OrcaConfig) -> Arc<dyn Cache> {
    if let Some(url) = &config.redis.url {
        match RedisCache::connect(url, config.redis.key_prefix.clone()).await {
            Ok(cache) => {
                info!("Using Redis cache");
                return Arc::new(cache);
            }
            // The cache only backs a best-effort stage.
            Err(e) => warn!(error = %e, "Redis unavailable, falling back to in-memory cache"),
        }
    }
    Arc::new(InMemoryCache::new())
}

async fn create_audit_store(config: &OrcaConfig, pool: Option<&PgPool>) -> Result<Arc<dyn AuditStore>> {
    match config.audit.backend {
        AuditBackend::Postgres => {
            let pool = pool.context("audit.backend = postgres requires database.url")?;
            let store = PostgresAuditStore::new(pool.clone());
            store.init_schema().await?;
            info!("Using Postgres audit store");
            Ok(Arc::new(store))
        }
        AuditBackend::Memory => {
            info!("Using in-memory audit store");
            Ok(Arc::new(InMemoryAuditStore::new()))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
