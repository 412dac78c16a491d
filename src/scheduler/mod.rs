//! Ties the registry, executor factory, and delegation client together
//! into the agent's single entry point for running a workload: decide
//! local vs. delegate vs. reject, then carry the decision out.

pub mod strategy;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::delegation::DelegationClient;
use crate::error::AgentError;
use crate::executor::ExecutorFactory;
use crate::model::{Allocation, Workload, WorkloadStatus};
use crate::registry::Registry;
use crate::telemetry::Metrics;
use strategy::{Decision, Strategy};

struct WorkloadRecord {
    workload: Workload,
    allocation_id: Option<u64>,
}

pub struct Scheduler {
    registry: Arc<Registry>,
    executors: ExecutorFactory,
    delegation: DelegationClient,
    strategy: Box<dyn Strategy>,
    workloads: RwLock<HashMap<String, WorkloadRecord>>,
    metrics: Option<Metrics>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Registry>,
        executors: ExecutorFactory,
        delegation: DelegationClient,
        strategy: Box<dyn Strategy>,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            registry,
            executors,
            delegation,
            strategy,
            workloads: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Local-first: a workload only looks for a delegate when the node's
    /// own available capacity cannot satisfy it.
    fn decide(&self, workload: &Workload) -> Decision {
        let local = self.registry.get_local();
        if local.available.satisfies(&workload.requirements) {
            return Decision::Local;
        }
        let candidates: Vec<_> = self
            .registry
            .get_all()
            .into_iter()
            .filter(|n| n.status == crate::model::NodeStatus::Active)
            .collect();
        match self.strategy.pick(&workload.requirements, &candidates) {
            Some(node_id) => Decision::DelegateTo(node_id),
            None => Decision::Reject(format!(
                "no local or neighbour capacity can satisfy {:?}",
                workload.requirements
            )),
        }
    }

    /// Submits a new workload: validates it, decides where it should run,
    /// and carries that decision out. Returns the workload as left after
    /// the attempt (its `status` reflects the outcome).
    pub async fn submit(&self, mut workload: Workload) -> Result<Workload, AgentError> {
        workload.validate()?;

        match self.decide(&workload) {
            Decision::Local => self.execute_local(workload).await,
            Decision::DelegateTo(node_id) => self.delegate(workload, &node_id).await,
            Decision::Reject(reason) => {
                workload.transition(WorkloadStatus::Failed)?;
                warn!(workload_id = %workload.id, reason, "workload rejected: no capacity anywhere");
                Err(AgentError::InsufficientResources(reason))
            }
        }
    }

    /// Runs `workload` on this node: allocates capacity, hands it to the
    /// matching executor, and releases the allocation again if the
    /// executor fails to start it.
    pub async fn execute_local(&self, mut workload: Workload) -> Result<Workload, AgentError> {
        let allocation: Allocation = self.registry.allocate(&workload.id, workload.requirements)?;

        let executor = match self.executors.get(workload.type_name()) {
            Ok(executor) => executor,
            Err(error) => {
                self.registry.release(allocation.id)?;
                return Err(error);
            }
        };

        match executor.execute(&mut workload).await {
            Ok(()) => {
                info!(workload_id = %workload.id, node = "local", "workload started");
                self.workloads.write().unwrap().insert(
                    workload.id.clone(),
                    WorkloadRecord { workload: workload.clone(), allocation_id: Some(allocation.id) },
                );
                self.refresh_workload_gauge();
                Ok(workload)
            }
            Err(error) => {
                warn!(workload_id = %workload.id, %error, "executor failed to start workload, releasing allocation");
                self.registry.release(allocation.id)?;
                workload.transition(WorkloadStatus::Failed)?;
                Err(error)
            }
        }
    }

    async fn delegate(&self, mut workload: Workload, node_id: &str) -> Result<Workload, AgentError> {
        let target = self
            .registry
            .get_all()
            .into_iter()
            .find(|n| n.node_id == node_id)
            .ok_or_else(|| AgentError::NotFound(format!("unknown delegation target: {node_id}")))?;

        match self.delegation.delegate(&target, &mut workload).await {
            Ok(()) => {
                workload.transition(WorkloadStatus::Running)?;
                info!(workload_id = %workload.id, node = node_id, "workload delegated");
                self.workloads
                    .write()
                    .unwrap()
                    .insert(workload.id.clone(), WorkloadRecord { workload: workload.clone(), allocation_id: None });
                Ok(workload)
            }
            Err(error) => {
                warn!(workload_id = %workload.id, node = node_id, %error, "delegation failed");
                workload.transition(WorkloadStatus::Failed)?;
                Err(error)
            }
        }
    }

    pub async fn stop_workload(&self, workload_id: &str) -> Result<(), AgentError> {
        let (mut workload, allocation_id) = {
            let workloads = self.workloads.read().unwrap();
            let record = workloads
                .get(workload_id)
                .ok_or_else(|| AgentError::NotFound(format!("unknown workload: {workload_id}")))?;
            (record.workload.clone(), record.allocation_id)
        };

        if let Some(executor) = self.executors.get(workload.type_name()).ok() {
            executor.stop(&workload).await.map_err(|e| AgentError::Stop(e.to_string()))?;
        }

        if let Some(allocation_id) = allocation_id {
            self.registry.release(allocation_id)?;
        }

        workload.transition(WorkloadStatus::Stopped)?;
        if let Some(record) = self.workloads.write().unwrap().get_mut(workload_id) {
            record.workload = workload;
        }
        self.refresh_workload_gauge();
        Ok(())
    }

    pub fn get_workload(&self, workload_id: &str) -> Option<Workload> {
        self.workloads.read().unwrap().get(workload_id).map(|r| r.workload.clone())
    }

    pub fn list_workloads(&self) -> Vec<Workload> {
        self.workloads.read().unwrap().values().map(|r| r.workload.clone()).collect()
    }

    pub async fn get_workload_logs(&self, workload_id: &str, lines: usize) -> Result<Vec<String>, AgentError> {
        let workload = self
            .get_workload(workload_id)
            .ok_or_else(|| AgentError::NotFound(format!("unknown workload: {workload_id}")))?;
        let executor = self.executors.get(workload.type_name())?;
        executor.get_logs(&workload, lines).await
    }

    fn refresh_workload_gauge(&self) {
        let Some(metrics) = &self.metrics else { return };
        let workloads = self.workloads.read().unwrap();
        let mut counts: HashMap<&'static str, i64> = HashMap::new();
        for record in workloads.values() {
            let status = match record.workload.status {
                WorkloadStatus::Pending => "pending",
                WorkloadStatus::Running => "running",
                WorkloadStatus::Completed => "completed",
                WorkloadStatus::Failed => "failed",
                WorkloadStatus::Stopped => "stopped",
            };
            *counts.entry(status).or_insert(0) += 1;
        }
        for (status, count) in counts {
            metrics.workloads.with_label_values(&[status]).set(count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpClientSection;
    use crate::executor::process::ProcessExecutor;
    use crate::model::quantity::Quantity;
    use crate::model::workload::{ProcessDetails, WorkloadKind};
    use crate::registry::RegistryConfig;
    use std::collections::HashMap as StdHashMap;
    use std::time::Duration;
    use strategy::FirstFitStrategy;

    fn test_registry(total: Quantity) -> Arc<Registry> {
        Registry::new(
            "local",
            total,
            RegistryConfig {
                staleness_sweep_period: Duration::from_secs(30),
                staleness_multiplier: 3,
                heartbeat_period: Duration::from_secs(30),
            },
            None,
        )
    }

    fn test_scheduler(total: Quantity, log_dir: std::path::PathBuf) -> Scheduler {
        let registry = test_registry(total);
        let mut executors = ExecutorFactory::new();
        executors.register("process", Arc::new(ProcessExecutor::new(log_dir)));
        let delegation = DelegationClient::new(&HttpClientSection::default()).unwrap();
        Scheduler::new(registry, executors, delegation, Box::new(FirstFitStrategy), None)
    }

    fn process_workload(cpu_millis: i64) -> Workload {
        Workload::new(
            "w1",
            Quantity::new(cpu_millis, 0, 0, 0),
            WorkloadKind::Process(ProcessDetails {
                command: "true".into(),
                args: Vec::new(),
                env: StdHashMap::new(),
                working_dir: None,
                pid: None,
                exit_code: None,
            }),
        )
    }

    #[tokio::test]
    async fn sufficient_local_capacity_runs_locally() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = test_scheduler(Quantity::new(4000, 0, 0, 0), dir.path().to_path_buf());
        let workload = scheduler.submit(process_workload(1000)).await.unwrap();
        assert_eq!(workload.status, WorkloadStatus::Running);
    }

    #[tokio::test]
    async fn insufficient_capacity_with_no_neighbours_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = test_scheduler(Quantity::new(100, 0, 0, 0), dir.path().to_path_buf());
        let result = scheduler.submit(process_workload(1000)).await;
        assert!(matches!(result, Err(AgentError::InsufficientResources(_))));
    }

    #[tokio::test]
    async fn stopping_a_running_workload_releases_its_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = test_scheduler(Quantity::new(1000, 0, 0, 0), dir.path().to_path_buf());
        let workload = scheduler.submit(process_workload(1000)).await.unwrap();
        assert_eq!(scheduler.registry.get_local().available, Quantity::ZERO);
        scheduler.stop_workload(&workload.id).await.unwrap();
        assert_eq!(scheduler.registry.get_local().available, Quantity::new(1000, 0, 0, 0));
    }
}
