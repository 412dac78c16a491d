//! Library entry point: wires the registry, scheduler, executors, and
//! HTTP surface together behind [`AgentState`], and exposes [`run`] for
//! the binary to drive.

pub mod config;
pub mod delegation;
pub mod error;
pub mod executor;
pub mod http;
pub mod model;
pub mod overlay;
pub mod registry;
pub mod scheduler;
pub mod storage;
pub mod telemetry;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use config::AgentConfig;
use delegation::DelegationClient;
use error::AgentError;
use executor::container::ContainerExecutor;
use executor::data::DataExecutor;
use executor::process::ProcessExecutor;
use executor::service::ServiceExecutor;
use executor::vision::VisionExecutor;
use executor::ExecutorFactory;
use model::workload::WorkloadStatus;
use registry::{Registry, RegistryConfig};
use scheduler::strategy::{BestFitStrategy, FirstFitStrategy, Strategy};
use scheduler::Scheduler;
use storage::FilesystemStorage;
use telemetry::Metrics;

/// Shared handle every HTTP handler receives via axum's `State` extractor.
/// Cheap to clone: every field is itself an `Arc` or `Clone`-cheap value.
#[derive(Clone)]
pub struct AgentState {
    pub registry: Arc<Registry>,
    pub scheduler: Arc<Scheduler>,
    pub config: Arc<AgentConfig>,
    pub metrics: Option<Metrics>,
    pub prometheus_registry: prometheus::Registry,
}

fn build_strategy(kind: config::SchedulerStrategyKind) -> Box<dyn Strategy> {
    match kind {
        config::SchedulerStrategyKind::Default => Box::new(FirstFitStrategy),
        config::SchedulerStrategyKind::BestFit => Box::new(BestFitStrategy),
    }
}

/// Assembles the agent's components from `config` and runs the HTTP
/// server until the process receives a shutdown signal.
pub async fn run(config: AgentConfig) -> Result<(), AgentError> {
    let prometheus_registry = telemetry::new_registry();
    let metrics = Some(Metrics::register(&prometheus_registry));

    let registry = Registry::new(
        config.agent.node_id.clone(),
        config.resources.total,
        RegistryConfig {
            staleness_sweep_period: config.registry.staleness_sweep_period,
            staleness_multiplier: config.registry.staleness_multiplier,
            heartbeat_period: config.agent.heartbeat,
        },
        metrics.clone(),
    );

    let log_dir = PathBuf::from(&config.data.data_root).join("logs");
    let storage = Arc::new(FilesystemStorage::new(PathBuf::from(&config.data.data_root).join("objects")));

    let mut executors = ExecutorFactory::new();
    executors.register("process", Arc::new(ProcessExecutor::new(log_dir.clone())));
    executors.register("data", Arc::new(DataExecutor::new(storage)));
    executors.register(
        "vision_batch",
        Arc::new(VisionExecutor::new(config.bin.clone(), log_dir.clone())),
    );
    executors.register(
        "container",
        Arc::new(ContainerExecutor::new(config.bin.container_runtime.clone(), log_dir.clone())),
    );
    let service_executor = Arc::new(ServiceExecutor::new(
        config.bin.clone(),
        config.service_executor.clone(),
        log_dir,
        metrics.clone(),
    ));
    executors.register("inference_service", service_executor.clone());
    executors.register("data_gateway", service_executor);

    let delegation = DelegationClient::new(&config.http_client)?;
    let strategy = build_strategy(config.scheduler.strategy);
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&registry),
        executors,
        delegation.clone(),
        strategy,
        metrics.clone(),
    ));

    let staleness_token = registry.spawn_staleness_sweep();
    let overlay_token = overlay::bootstrap(&config, &registry, &delegation).await;

    let state = AgentState {
        registry: Arc::clone(&registry),
        scheduler,
        config: Arc::new(config.clone()),
        metrics,
        prometheus_registry,
    };

    let router = http::router(state.clone());
    let addr: SocketAddr = format!("{}:{}", config.agent.address, config.agent.port)
        .parse()
        .map_err(|e| AgentError::Fatal(format!("invalid bind address: {e}")))?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, node_id = %config.agent.node_id, "agent listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AgentError::Fatal(format!("server error: {e}")))?;

    staleness_token.cancel();
    overlay_token.cancel();
    drain_workloads(&state).await;
    Ok(())
}

/// Stops every still-running workload on shutdown so nothing is left
/// orphaned: no new submissions can arrive once `axum::serve` has
/// returned, so this only has to settle whatever was in flight already.
async fn drain_workloads(state: &AgentState) {
    let running: Vec<String> = state
        .scheduler
        .list_workloads()
        .into_iter()
        .filter(|w| w.status == WorkloadStatus::Running)
        .map(|w| w.id)
        .collect();
    for workload_id in running {
        if let Err(error) = state.scheduler.stop_workload(&workload_id).await {
            tracing::warn!(%workload_id, %error, "failed to stop workload during shutdown drain");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
