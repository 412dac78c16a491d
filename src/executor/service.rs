//! Executor for long-lived service workloads: inference sidecars and the
//! data gateway. Readiness and liveness are both driven off the same
//! `GET /health` probe; a steady-state ticker restarts the sidecar up to
//! a configured limit before giving up.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Executor, ObservedStatus, ServiceExecutor as ServiceExecutorTrait};
use crate::config::{ServiceExecutorSection, SidecarBinariesSection};
use crate::error::AgentError;
use crate::model::workload::WorkloadKind;
use crate::model::{Workload, WorkloadStatus};
use crate::telemetry::Metrics;

struct ServiceRecord {
    host: String,
    port: u16,
    log_path: PathBuf,
    status: ObservedStatus,
    restart_count: u32,
    cancel: CancellationToken,
}

struct ChildHandle {
    child: Child,
    program: String,
    args: Vec<String>,
    log_path: PathBuf,
}

type RecordMap = Arc<RwLock<HashMap<String, ServiceRecord>>>;
type HandleMap = Arc<tokio::sync::Mutex<HashMap<String, ChildHandle>>>;

/// Supervises `InferenceService` and `DataGateway` workloads by spawning
/// the configured sidecar binary and polling its HTTP health endpoint.
pub struct ServiceExecutor {
    bin: SidecarBinariesSection,
    config: ServiceExecutorSection,
    log_dir: PathBuf,
    http_client: reqwest::Client,
    records: RecordMap,
    handles: HandleMap,
    metrics: Option<Metrics>,
}

impl ServiceExecutor {
    pub fn new(
        bin: SidecarBinariesSection,
        config: ServiceExecutorSection,
        log_dir: PathBuf,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            bin,
            config,
            log_dir,
            http_client: reqwest::Client::new(),
            records: Arc::new(RwLock::new(HashMap::new())),
            handles: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            metrics,
        }
    }

    fn build_command(&self, workload: &Workload) -> Result<(String, Vec<String>, String, u16), AgentError> {
        match &workload.kind {
            WorkloadKind::InferenceService(d) => {
                let program = match d.model_type.as_str() {
                    "yolo" => self.bin.yolo.clone(),
                    "opencv" => self.bin.opencv.clone(),
                    other => {
                        return Err(AgentError::Validation(format!(
                            "no sidecar binary configured for model_type '{other}'"
                        )))
                    }
                };
                let mut args = vec![
                    "--model-path".to_string(),
                    d.model_path.clone(),
                    "--host".to_string(),
                    d.service_host.clone(),
                    "--port".to_string(),
                    d.service_port.to_string(),
                ];
                if let Some(config_path) = &d.config_path {
                    args.push("--config".to_string());
                    args.push(config_path.clone());
                }
                Ok((program, args, d.service_host.clone(), d.service_port))
            }
            WorkloadKind::DataGateway(g) => {
                let mut args = vec![
                    "--base-path".to_string(),
                    g.base_path.clone(),
                    "--bucket".to_string(),
                    g.bucket.clone(),
                    "--host".to_string(),
                    g.service_host.clone(),
                    "--port".to_string(),
                    g.service_port.to_string(),
                ];
                if g.read_only {
                    args.push("--read-only".to_string());
                }
                if let Some(token) = &g.auth_token {
                    args.push("--auth-token".to_string());
                    args.push(token.clone());
                }
                Ok((self.bin.data_gateway.clone(), args, g.service_host.clone(), g.service_port))
            }
            _ => Err(AgentError::Validation(
                "ServiceExecutor only handles inference_service and data_gateway workloads".into(),
            )),
        }
    }

    async fn spawn_process(&self, program: &str, args: &[String], workload_id: &str) -> Result<(Child, PathBuf), AgentError> {
        tokio::fs::create_dir_all(&self.log_dir).await?;
        let log_path = self.log_dir.join(format!("{workload_id}.log"));
        let stdout_file = std::fs::File::create(&log_path)?;
        let stderr_file = stdout_file.try_clone()?;

        let mut command = Command::new(program);
        command.args(args);
        command.stdout(Stdio::from(stdout_file));
        command.stderr(Stdio::from(stderr_file));
        command.kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| AgentError::Execution(format!("failed to spawn sidecar '{program}': {e}")))?;
        Ok((child, log_path))
    }

    async fn poll_until_ready(&self, host: &str, port: u16, workload_id: &str) -> bool {
        poll_until_ready(&self.http_client, &self.handles, host, port, workload_id, self.config.ready_deadline).await
    }

    fn spawn_health_ticker(&self, workload_id: String) {
        let token = {
            let records = self.records.read().unwrap();
            records.get(&workload_id).map(|r| r.cancel.clone())
        };
        let Some(token) = token else { return };

        let records = Arc::clone(&self.records);
        let handles = Arc::clone(&self.handles);
        let http_client = self.http_client.clone();
        let config = self.config.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.health_probe_period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !probe_once(&http_client, &records, &workload_id).await
                            && !restart_or_give_up(&http_client, &records, &handles, &metrics, &config, &workload_id).await
                        {
                            break;
                        }
                    }
                }
            }
        });
    }
}

/// Polls `GET /health` until it returns 200 OK or `ready_deadline` elapses.
/// Also checks the sidecar's own process hasn't already exited, so a
/// binary that dies immediately (spec §8 S4) fails fast instead of
/// burning the full deadline.
async fn poll_until_ready(
    http_client: &reqwest::Client,
    handles: &HandleMap,
    host: &str,
    port: u16,
    workload_id: &str,
    ready_deadline: Duration,
) -> bool {
    let url = format!("http://{host}:{port}/health");
    let deadline = tokio::time::Instant::now() + ready_deadline;
    let mut interval = tokio::time::interval(Duration::from_millis(300));
    loop {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        interval.tick().await;
        {
            let mut handles = handles.lock().await;
            if let Some(handle) = handles.get_mut(workload_id) {
                if matches!(handle.child.try_wait(), Ok(Some(_))) {
                    return false;
                }
            }
        }
        if let Ok(response) = http_client.get(&url).send().await {
            if response.status().is_success() {
                return true;
            }
        }
    }
}

async fn probe_once(http_client: &reqwest::Client, records: &RecordMap, workload_id: &str) -> bool {
    let (host, port) = {
        let records = records.read().unwrap();
        match records.get(workload_id) {
            Some(r) => (r.host.clone(), r.port),
            None => return true,
        }
    };
    let url = format!("http://{host}:{port}/health");
    matches!(http_client.get(&url).send().await, Ok(r) if r.status().is_success())
}

/// Returns `false` once the workload has exhausted its restart budget (or
/// the respawn itself failed) and the caller should stop ticking.
async fn restart_or_give_up(
    http_client: &reqwest::Client,
    records: &RecordMap,
    handles: &HandleMap,
    metrics: &Option<Metrics>,
    config: &ServiceExecutorSection,
    workload_id: &str,
) -> bool {
    let _ = http_client;
    let (program, args, log_path) = {
        let mut handles = handles.lock().await;
        match handles.remove(workload_id) {
            Some(mut handle) => {
                let _ = handle.child.kill().await;
                (handle.program, handle.args, handle.log_path)
            }
            None => return false,
        }
    };

    let restart_count = {
        let mut records = records.write().unwrap();
        match records.get_mut(workload_id) {
            Some(r) => {
                r.restart_count += 1;
                r.restart_count
            }
            None => return false,
        }
    };

    if restart_count > config.max_restarts {
        warn!(workload_id, "service exceeded restart budget, giving up");
        let mut records = records.write().unwrap();
        if let Some(r) = records.get_mut(workload_id) {
            r.status = ObservedStatus::Failed;
        }
        return false;
    }

    if let Some(metrics) = metrics {
        metrics.service_restarts_total.with_label_values(&[workload_id]).inc();
    }
    info!(workload_id, restart_count, "restarting unhealthy service");

    let log_file = std::fs::OpenOptions::new().create(true).append(true).open(&log_path);
    let (stdout, stderr) = match log_file {
        Ok(file) => (Stdio::from(file.try_clone().expect("dup log fd")), Stdio::from(file)),
        Err(_) => (Stdio::null(), Stdio::null()),
    };

    match Command::new(&program).args(&args).stdout(stdout).stderr(stderr).kill_on_drop(true).spawn() {
        Ok(child) => {
            let mut handles = handles.lock().await;
            handles.insert(workload_id.to_string(), ChildHandle { child, program, args, log_path });
            true
        }
        Err(error) => {
            warn!(workload_id, %error, "failed to respawn service");
            let mut records = records.write().unwrap();
            if let Some(r) = records.get_mut(workload_id) {
                r.status = ObservedStatus::Failed;
            }
            false
        }
    }
}

#[async_trait]
impl Executor for ServiceExecutor {
    async fn execute(&self, workload: &mut Workload) -> Result<(), AgentError> {
        let (program, args, host, port) = self.build_command(workload)?;
        let (child, log_path) = self.spawn_process(&program, &args, &workload.id).await?;

        {
            let mut handles = self.handles.lock().await;
            handles.insert(workload.id.clone(), ChildHandle { child, program, args, log_path: log_path.clone() });
        }
        {
            let mut records = self.records.write().unwrap();
            records.insert(
                workload.id.clone(),
                ServiceRecord {
                    host: host.clone(),
                    port,
                    log_path,
                    status: ObservedStatus::Running,
                    restart_count: 0,
                    cancel: CancellationToken::new(),
                },
            );
        }

        if !self.poll_until_ready(&host, port, &workload.id).await {
            self.stop(workload).await?;
            return Err(AgentError::Execution(format!(
                "service for workload {} did not become ready within the configured deadline",
                workload.id
            )));
        }

        let endpoint = format!("http://{host}:{port}");
        workload.metadata.insert("endpoint".to_string(), endpoint.clone());
        if let WorkloadKind::InferenceService(d) = &mut workload.kind {
            d.endpoint = Some(endpoint);
        }
        workload.transition(WorkloadStatus::Running)?;

        self.spawn_health_ticker(workload.id.clone());
        Ok(())
    }

    /// Stops the ticker, force-kills the sidecar, and removes the entry
    /// from the service map (spec §4.6 shutdown); the workload's own
    /// stored status is set to `stopped` by the caller.
    async fn stop(&self, workload: &Workload) -> Result<(), AgentError> {
        if let Some(record) = self.records.read().unwrap().get(&workload.id) {
            record.cancel.cancel();
        }
        {
            let mut handles = self.handles.lock().await;
            if let Some(mut handle) = handles.remove(&workload.id) {
                let _ = handle.child.kill().await;
            }
        }
        self.records.write().unwrap().remove(&workload.id);
        Ok(())
    }

    async fn get_logs(&self, workload: &Workload, lines: usize) -> Result<Vec<String>, AgentError> {
        let log_path = {
            let records = self.records.read().unwrap();
            match records.get(&workload.id) {
                Some(record) => record.log_path.clone(),
                None => return Ok(Vec::new()),
            }
        };
        let content = tokio::fs::read_to_string(&log_path).await.unwrap_or_default();
        let all_lines: Vec<String> = content.lines().map(str::to_string).collect();
        let start = all_lines.len().saturating_sub(lines);
        Ok(all_lines[start..].to_vec())
    }

    async fn get_status(&self, workload: &Workload) -> ObservedStatus {
        self.records.read().unwrap().get(&workload.id).map(|r| r.status).unwrap_or(ObservedStatus::Unknown)
    }
}

#[async_trait]
impl ServiceExecutorTrait for ServiceExecutor {
    async fn get_endpoint(&self, workload_id: &str) -> Option<String> {
        let records = self.records.read().unwrap();
        records.get(workload_id).map(|r| format!("http://{}:{}", r.host, r.port))
    }

    async fn health_check(&self, workload_id: &str) -> Result<(), AgentError> {
        if probe_once(&self.http_client, &self.records, workload_id).await {
            Ok(())
        } else {
            Err(AgentError::Execution(format!("service {workload_id} failed its health check")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::quantity::Quantity;
    use crate::model::workload::InferenceServiceDetails;

    fn inference_workload(model_type: &str) -> Workload {
        Workload::new(
            "svc1",
            Quantity::new(500, 0, 0, 0),
            WorkloadKind::InferenceService(InferenceServiceDetails {
                model_path: "models/yolov8n.onnx".into(),
                model_type: model_type.into(),
                framework: None,
                config_path: None,
                service_host: "127.0.0.1".into(),
                service_port: 18080,
                endpoint: None,
                pid: None,
            }),
        )
    }

    #[test]
    fn unknown_model_type_is_rejected_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ServiceExecutor::new(
            SidecarBinariesSection::default(),
            ServiceExecutorSection::default(),
            dir.path().to_path_buf(),
            None,
        );
        let workload = inference_workload("unknown-model-kind");
        assert!(executor.build_command(&workload).is_err());
    }

    /// Spec §8 S4: a sidecar that exits immediately must fail `execute`
    /// within the ready deadline, release any resources it grabbed, and
    /// leave no entry in the service map.
    #[tokio::test]
    async fn s4_sidecar_exiting_immediately_fails_within_the_ready_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let mut bin = SidecarBinariesSection::default();
        bin.yolo = "/bin/true".to_string();
        let config = ServiceExecutorSection {
            ready_deadline: Duration::from_millis(500),
            ..ServiceExecutorSection::default()
        };
        let executor = ServiceExecutor::new(bin, config, dir.path().to_path_buf(), None);
        let mut workload = inference_workload("yolo");

        let started = tokio::time::Instant::now();
        let result = executor.execute(&mut workload).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(2), "must fail well within the ready deadline");
        assert_eq!(executor.get_endpoint(&workload.id).await, None);
    }

    /// Spec §8 S5: a service that keeps failing its health probe gets
    /// restarted up to `max_restarts` times, then is marked `failed` and
    /// left without a running process.
    #[tokio::test]
    async fn s5_restart_budget_is_enforced_then_service_is_marked_failed() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("svc1.log");
        let workload_id = "svc1".to_string();
        let config = ServiceExecutorSection { max_restarts: 2, ..ServiceExecutorSection::default() };

        let records: RecordMap = Arc::new(RwLock::new(HashMap::new()));
        let handles: HandleMap = Arc::new(tokio::sync::Mutex::new(HashMap::new()));
        let http_client = reqwest::Client::new();

        let seed_child = Command::new("sleep").arg("30").stdout(Stdio::null()).stderr(Stdio::null()).spawn().unwrap();
        handles.lock().await.insert(
            workload_id.clone(),
            ChildHandle { child: seed_child, program: "sleep".to_string(), args: vec!["30".to_string()], log_path: log_path.clone() },
        );
        records.write().unwrap().insert(
            workload_id.clone(),
            ServiceRecord {
                host: "127.0.0.1".to_string(),
                port: 0,
                log_path,
                status: ObservedStatus::Running,
                restart_count: 0,
                cancel: CancellationToken::new(),
            },
        );

        for expected_restart_count in 1..=config.max_restarts {
            let kept_ticking =
                restart_or_give_up(&http_client, &records, &handles, &None, &config, &workload_id).await;
            assert!(kept_ticking, "restart {expected_restart_count} is within budget and should respawn");
            assert_eq!(records.read().unwrap().get(&workload_id).unwrap().restart_count, expected_restart_count);
            assert_eq!(records.read().unwrap().get(&workload_id).unwrap().status, ObservedStatus::Running);
            assert!(handles.lock().await.contains_key(&workload_id), "a respawned handle must be present");
        }

        let kept_ticking = restart_or_give_up(&http_client, &records, &handles, &None, &config, &workload_id).await;
        assert!(!kept_ticking, "exceeding max_restarts must stop the ticker");
        assert_eq!(records.read().unwrap().get(&workload_id).unwrap().status, ObservedStatus::Failed);
        assert!(!handles.lock().await.contains_key(&workload_id), "no further process should be running");
    }

    #[test]
    fn known_model_type_resolves_yolo_binary() {
        let dir = tempfile::tempdir().unwrap();
        let bin = SidecarBinariesSection::default();
        let expected = bin.yolo.clone();
        let executor = ServiceExecutor::new(bin, ServiceExecutorSection::default(), dir.path().to_path_buf(), None);
        let workload = inference_workload("yolo");
        let (program, _, host, port) = executor.build_command(&workload).unwrap();
        assert_eq!(program, expected);
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 18080);
    }
}
