//! Container executor (spec §3, §4.4): runs the configured container
//! image through an external container runtime binary (`docker` by
//! default), the same shell-out idiom [`super::vision::VisionExecutor`]
//! uses for its sidecars, generalized to a long-running, stoppable
//! workload rather than a run-to-completion batch.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use super::{Executor, ObservedStatus};
use crate::error::AgentError;
use crate::model::workload::{ContainerDetails, Protocol, WorkloadKind};
use crate::model::{Workload, WorkloadStatus};

struct ContainerRecord {
    container_id: String,
    log_path: PathBuf,
    status: ObservedStatus,
}

/// Drives containers through the configured runtime CLI rather than
/// linking a client library for it, mirroring how the vision/data
/// sidecars are driven as external binaries rather than in-process
/// dependencies.
pub struct ContainerExecutor {
    runtime_bin: String,
    log_dir: PathBuf,
    containers: Arc<RwLock<HashMap<String, ContainerRecord>>>,
}

impl ContainerExecutor {
    pub fn new(runtime_bin: String, log_dir: PathBuf) -> Self {
        Self {
            runtime_bin,
            log_dir,
            containers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn container_name(workload_id: &str) -> String {
        format!("cnet-{workload_id}")
    }

    fn build_run_args(details: &ContainerDetails, name: &str) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string(), "--name".to_string(), name.to_string()];
        for port in &details.ports {
            let proto = match port.proto {
                Protocol::Tcp => "tcp",
                Protocol::Udp => "udp",
            };
            args.push("-p".to_string());
            args.push(format!("{}:{}/{proto}", port.host, port.container));
        }
        for volume in &details.volumes {
            args.push("-v".to_string());
            let mode = if volume.ro { ":ro" } else { "" };
            args.push(format!("{}:{}{mode}", volume.host, volume.container));
        }
        for (key, value) in &details.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(details.image.clone());
        if !details.command.is_empty() {
            args.push(details.command.clone());
        }
        args.extend(details.args.iter().cloned());
        args
    }

    async fn run_cli(&self, args: &[String]) -> Result<std::process::Output, AgentError> {
        Command::new(&self.runtime_bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AgentError::Execution(format!("failed to invoke '{}': {e}", self.runtime_bin)))
    }
}

#[async_trait]
impl Executor for ContainerExecutor {
    async fn execute(&self, workload: &mut Workload) -> Result<(), AgentError> {
        let mut details = match &workload.kind {
            WorkloadKind::Container(c) => c.clone(),
            _ => return Err(AgentError::Validation("ContainerExecutor only handles container workloads".into())),
        };

        let name = Self::container_name(&workload.id);
        let run_args = Self::build_run_args(&details, &name);
        let output = self.run_cli(&run_args).await?;
        if !output.status.success() {
            return Err(AgentError::Execution(format!(
                "'{} run' failed for workload {}: {}",
                self.runtime_bin,
                workload.id,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(AgentError::Execution(format!(
                "'{} run' produced no container id for workload {}",
                self.runtime_bin, workload.id
            )));
        }

        tokio::fs::create_dir_all(&self.log_dir).await?;
        let log_path = self.log_dir.join(format!("{}.log", workload.id));

        details.container_id = Some(container_id.clone());
        if let WorkloadKind::Container(c) = &mut workload.kind {
            *c = details;
        }
        workload.transition(WorkloadStatus::Running)?;

        self.containers.write().unwrap().insert(
            workload.id.clone(),
            ContainerRecord {
                container_id: container_id.clone(),
                log_path,
                status: ObservedStatus::Running,
            },
        );

        let runtime_bin = self.runtime_bin.clone();
        let containers = Arc::clone(&self.containers);
        let workload_id = workload.id.clone();
        tokio::spawn(async move {
            let wait = Command::new(&runtime_bin).args(["wait", &container_id]).output().await;
            let mut containers = containers.write().unwrap();
            if let Some(record) = containers.get_mut(&workload_id) {
                match wait {
                    Ok(output) if output.status.success() => {
                        let exit_code = String::from_utf8_lossy(&output.stdout).trim().parse::<i64>().unwrap_or(-1);
                        record.status = if exit_code == 0 { ObservedStatus::Completed } else { ObservedStatus::Failed };
                        info!(workload_id = %workload_id, exit_code, "container exited");
                    }
                    _ => {
                        record.status = ObservedStatus::Unknown;
                        warn!(workload_id = %workload_id, "failed to wait on container");
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self, workload: &Workload) -> Result<(), AgentError> {
        let container_id = {
            let containers = self.containers.read().unwrap();
            match containers.get(&workload.id) {
                Some(record) if record.status == ObservedStatus::Running => record.container_id.clone(),
                _ => return Ok(()), // idempotent: nothing running to stop
            }
        };
        let _ = self.run_cli(&["stop".to_string(), container_id]).await?;
        if let Some(record) = self.containers.write().unwrap().get_mut(&workload.id) {
            record.status = ObservedStatus::Stopped;
        }
        Ok(())
    }

    async fn get_logs(&self, workload: &Workload, lines: usize) -> Result<Vec<String>, AgentError> {
        let container_id = {
            let containers = self.containers.read().unwrap();
            match containers.get(&workload.id) {
                Some(record) => record.container_id.clone(),
                None => return Ok(Vec::new()),
            }
        };
        let output = self
            .run_cli(&["logs".to_string(), "--tail".to_string(), lines.to_string(), container_id])
            .await?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().map(str::to_string).collect())
    }

    async fn get_status(&self, workload: &Workload) -> ObservedStatus {
        self.containers
            .read()
            .unwrap()
            .get(&workload.id)
            .map(|record| record.status)
            .unwrap_or(ObservedStatus::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::quantity::Quantity;
    use crate::model::workload::{PortMapping, VolumeMount};

    fn container_workload() -> Workload {
        Workload::new(
            "c1",
            Quantity::new(500, 0, 256 * 1024 * 1024, 0),
            WorkloadKind::Container(ContainerDetails {
                image: "alpine:3.19".to_string(),
                command: "echo".to_string(),
                args: vec!["hi".to_string()],
                env: HashMap::from([("FOO".to_string(), "bar".to_string())]),
                ports: vec![PortMapping { host: 8080, container: 80, proto: Protocol::Tcp }],
                volumes: vec![VolumeMount { host: "/data".to_string(), container: "/data".to_string(), ro: true }],
                container_id: None,
            }),
        )
    }

    #[test]
    fn run_args_include_ports_volumes_env_and_command() {
        let details = match &container_workload().kind {
            WorkloadKind::Container(c) => c.clone(),
            _ => unreachable!(),
        };
        let args = ContainerExecutor::build_run_args(&details, "cnet-c1");
        assert!(args.contains(&"-p".to_string()));
        assert!(args.contains(&"8080:80/tcp".to_string()));
        assert!(args.contains(&"-v".to_string()));
        assert!(args.contains(&"/data:/data:ro".to_string()));
        assert!(args.contains(&"-e".to_string()));
        assert!(args.contains(&"FOO=bar".to_string()));
        assert!(args.contains(&"alpine:3.19".to_string()));
        assert!(args.contains(&"echo".to_string()));
        assert!(args.contains(&"hi".to_string()));
    }

    #[tokio::test]
    async fn stop_before_execute_is_a_harmless_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ContainerExecutor::new("docker".to_string(), dir.path().to_path_buf());
        let workload = container_workload();
        assert!(executor.stop(&workload).await.is_ok());
    }

    #[tokio::test]
    async fn missing_runtime_binary_is_reported_as_an_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ContainerExecutor::new("cnet-no-such-runtime-binary".to_string(), dir.path().to_path_buf());
        let mut workload = container_workload();
        let result = executor.execute(&mut workload).await;
        assert!(result.is_err());
    }
}
