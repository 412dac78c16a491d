//! Process executor (spec §4.5): forks the configured command, redirects
//! output to a per-workload log file, and supervises exit via a
//! background waiter.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use super::{Executor, ObservedStatus};
use crate::error::AgentError;
use crate::model::workload::WorkloadKind;
use crate::model::{Workload, WorkloadStatus};

struct ProcessRecord {
    pid: u32,
    log_path: PathBuf,
    status: ObservedStatus,
    exit_code: Option<i32>,
}

/// Forks and supervises plain OS processes. One record per workload,
/// guarded by a single `RwLock` (spec §5's "each mutable collection ...
/// is protected by a single reader/writer lock").
pub struct ProcessExecutor {
    log_dir: PathBuf,
    processes: Arc<RwLock<HashMap<String, ProcessRecord>>>,
}

impl ProcessExecutor {
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            processes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn log_path_for(&self, workload_id: &str) -> PathBuf {
        self.log_dir.join(format!("{workload_id}.log"))
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, workload: &mut Workload) -> Result<(), AgentError> {
        let details = match &workload.kind {
            WorkloadKind::Process(p) => p.clone(),
            _ => return Err(AgentError::Validation("ProcessExecutor only handles process workloads".into())),
        };

        tokio::fs::create_dir_all(&self.log_dir).await?;
        let log_path = self.log_path_for(&workload.id);
        let stdout_file = std::fs::File::create(&log_path)?;
        let stderr_file = stdout_file.try_clone()?;

        let mut command = Command::new(&details.command);
        command.args(&details.args);
        command.envs(&details.env);
        if let Some(dir) = &details.working_dir {
            command.current_dir(dir);
        }
        command.stdout(Stdio::from(stdout_file));
        command.stderr(Stdio::from(stderr_file));
        command.kill_on_drop(false);

        let mut child = command
            .spawn()
            .map_err(|e| AgentError::Execution(format!("failed to spawn process: {e}")))?;

        let pid = child
            .id()
            .ok_or_else(|| AgentError::Execution("process exited immediately after spawn".into()))?;

        {
            let mut processes = self.processes.write().unwrap();
            processes.insert(
                workload.id.clone(),
                ProcessRecord {
                    pid,
                    log_path: log_path.clone(),
                    status: ObservedStatus::Running,
                    exit_code: None,
                },
            );
        }

        if let WorkloadKind::Process(p) = &mut workload.kind {
            p.pid = Some(pid);
        }
        workload.transition(WorkloadStatus::Running)?;

        let processes = Arc::clone(&self.processes);
        let workload_id = workload.id.clone();
        tokio::spawn(async move {
            let exit = child.wait().await;
            let mut processes = processes.write().unwrap();
            if let Some(record) = processes.get_mut(&workload_id) {
                match exit {
                    Ok(status) if status.success() => {
                        record.status = ObservedStatus::Completed;
                        record.exit_code = Some(0);
                        info!(workload_id = %workload_id, "process completed");
                    }
                    Ok(status) => {
                        record.status = ObservedStatus::Failed;
                        record.exit_code = status.code();
                        warn!(workload_id = %workload_id, code = ?status.code(), "process exited with failure");
                    }
                    Err(error) => {
                        record.status = ObservedStatus::Failed;
                        warn!(workload_id = %workload_id, %error, "failed to wait for process");
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self, workload: &Workload) -> Result<(), AgentError> {
        let pid = {
            let processes = self.processes.read().unwrap();
            match processes.get(&workload.id) {
                Some(record) if record.status == ObservedStatus::Running => record.pid,
                _ => return Ok(()), // idempotent: nothing to stop
            }
        };

        // SIGTERM first; escalate to SIGKILL if the process ignores it.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let still_running = unsafe { libc::kill(pid as libc::pid_t, 0) == 0 };
        if still_running {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGKILL);
            }
        }
        Ok(())
    }

    async fn get_logs(&self, workload: &Workload, lines: usize) -> Result<Vec<String>, AgentError> {
        let log_path = {
            let processes = self.processes.read().unwrap();
            match processes.get(&workload.id) {
                Some(record) => record.log_path.clone(),
                None => return Ok(Vec::new()),
            }
        };

        let file = match tokio::fs::File::open(&log_path).await {
            Ok(file) => file,
            Err(_) => return Ok(Vec::new()),
        };
        let mut reader = BufReader::new(file).lines();
        let mut all_lines = Vec::new();
        while let Some(line) = reader.next_line().await? {
            all_lines.push(line);
        }
        let start = all_lines.len().saturating_sub(lines);
        Ok(all_lines[start..].to_vec())
    }

    async fn get_status(&self, workload: &Workload) -> ObservedStatus {
        let processes = self.processes.read().unwrap();
        processes
            .get(&workload.id)
            .map(|record| record.status)
            .unwrap_or(ObservedStatus::Unknown)
    }
}
