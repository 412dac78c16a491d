use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::TracingSection;

/// Initializes the global tracing subscriber from the configured default
/// filter, honouring `RUST_LOG` if set. Grounded on the teacher's
/// `golem_common::tracing::init_tracing_with_default_env_filter`, which
/// is itself not in the retrieved pack, so reimplemented directly on
/// `tracing-subscriber`.
pub fn init_tracing(config: &TracingSection) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter.clone()));

    let subscriber = FmtSubscriber::builder().with_env_filter(filter);

    if config.json {
        let subscriber = subscriber.json().finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = subscriber.finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// Process-wide Prometheus metrics, exposed on `/metrics` (ambient
/// concern, spec §9 "wire it to an outbound heartbeat" + general
/// observability carried regardless of the spec's non-goals).
#[derive(Clone)]
pub struct Metrics {
    pub allocations_total: IntCounterVec,
    pub allocation_failures_total: IntCounterVec,
    pub registry_nodes: IntGaugeVec,
    pub workloads: IntGaugeVec,
    pub service_restarts_total: IntCounterVec,
}

impl Metrics {
    pub fn register(registry: &Registry) -> Metrics {
        let allocations_total = IntCounterVec::new(
            Opts::new("cnet_allocations_total", "Total allocations created"),
            &["node_id"],
        )
        .expect("metric definition is valid");
        let allocation_failures_total = IntCounterVec::new(
            Opts::new(
                "cnet_allocation_failures_total",
                "Total allocation attempts rejected for insufficient resources",
            ),
            &["node_id"],
        )
        .expect("metric definition is valid");
        let registry_nodes = IntGaugeVec::new(
            Opts::new("cnet_registry_nodes", "Mirrored node count by role and status"),
            &["role", "status"],
        )
        .expect("metric definition is valid");
        let workloads = IntGaugeVec::new(
            Opts::new("cnet_workloads", "Locally tracked workloads by status"),
            &["status"],
        )
        .expect("metric definition is valid");
        let service_restarts_total = IntCounterVec::new(
            Opts::new(
                "cnet_service_restarts_total",
                "Total restarts performed by service executors",
            ),
            &["workload_id"],
        )
        .expect("metric definition is valid");

        for collector in [
            Box::new(allocations_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(allocation_failures_total.clone()),
            Box::new(registry_nodes.clone()),
            Box::new(workloads.clone()),
            Box::new(service_restarts_total.clone()),
        ] {
            let _ = registry.register(collector);
        }

        Metrics {
            allocations_total,
            allocation_failures_total,
            registry_nodes,
            workloads,
            service_restarts_total,
        }
    }
}

pub fn new_registry() -> Registry {
    Registry::new()
}
