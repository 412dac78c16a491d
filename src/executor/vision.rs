//! Executor for `VisionBatch` workloads: runs a sidecar inference binary
//! once, synchronously, over a single input file and collects its
//! output (spec §3, §4.4 "batch types whose semantics are to
//! run-to-completion synchronously, e.g. vision and data"). The
//! vision pipeline itself — YOLO/OpenCV model code — is out of core
//! scope (spec §1); this only supervises the process.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::process::Command;

use super::{Executor, ObservedStatus};
use crate::config::SidecarBinariesSection;
use crate::error::AgentError;
use crate::model::workload::{VisionBatchDetails, VisionTask, WorkloadKind};
use crate::model::{Workload, WorkloadStatus};

struct BatchRecord {
    status: ObservedStatus,
    log_path: PathBuf,
}

/// Runs a one-shot sidecar process per submission rather than supervising
/// a long-lived one (contrast [`super::service::ServiceExecutor`]).
pub struct VisionExecutor {
    bin: SidecarBinariesSection,
    log_dir: PathBuf,
    records: RwLock<HashMap<String, BatchRecord>>,
}

impl VisionExecutor {
    pub fn new(bin: SidecarBinariesSection, log_dir: PathBuf) -> Self {
        Self {
            bin,
            log_dir,
            records: RwLock::new(HashMap::new()),
        }
    }

    fn resolve_binary(&self, details: &VisionBatchDetails) -> Result<String, AgentError> {
        match details.model_type.as_deref() {
            Some("opencv") => Ok(self.bin.opencv.clone()),
            Some("yolo") | None => Ok(self.bin.yolo.clone()),
            Some(other) => Err(AgentError::Validation(format!(
                "no sidecar binary configured for model_type '{other}'"
            ))),
        }
    }

    fn task_flag(task: VisionTask) -> &'static str {
        match task {
            VisionTask::Detection => "detection",
            VisionTask::FaceDetection => "face_detection",
            VisionTask::Classification => "classification",
            VisionTask::Segmentation => "segmentation",
            VisionTask::Tracking => "tracking",
            VisionTask::Ocr => "ocr",
        }
    }

    fn build_args(details: &VisionBatchDetails, output_path: &str) -> Vec<String> {
        let mut args = vec![
            "--task".to_string(),
            Self::task_flag(details.task).to_string(),
            "--input".to_string(),
            details.input_path.clone(),
            "--output".to_string(),
            output_path.to_string(),
            "--confidence".to_string(),
            details.confidence.to_string(),
            "--nms-threshold".to_string(),
            details.nms_threshold.to_string(),
        ];
        if let Some(model_path) = &details.model_path {
            args.push("--model-path".to_string());
            args.push(model_path.clone());
        }
        args
    }
}

#[async_trait]
impl Executor for VisionExecutor {
    async fn execute(&self, workload: &mut Workload) -> Result<(), AgentError> {
        let mut details = match &workload.kind {
            WorkloadKind::VisionBatch(v) => v.clone(),
            _ => return Err(AgentError::Validation("VisionExecutor only handles vision_batch workloads".into())),
        };

        let program = self.resolve_binary(&details)?;
        let output_path = details
            .output_path
            .clone()
            .unwrap_or_else(|| format!("{}.results.json", details.input_path));
        let args = Self::build_args(&details, &output_path);

        tokio::fs::create_dir_all(&self.log_dir).await?;
        let log_path = self.log_dir.join(format!("{}.log", workload.id));
        let stdout_file = std::fs::File::create(&log_path)?;
        let stderr_file = stdout_file.try_clone()?;

        workload.transition(WorkloadStatus::Running)?;
        self.records.write().unwrap().insert(
            workload.id.clone(),
            BatchRecord { status: ObservedStatus::Running, log_path: log_path.clone() },
        );

        let status = Command::new(&program)
            .args(&args)
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| AgentError::Execution(format!("failed to run vision sidecar '{program}': {e}")))?;

        if !status.success() {
            self.records.write().unwrap().insert(
                workload.id.clone(),
                BatchRecord { status: ObservedStatus::Failed, log_path },
            );
            workload.transition(WorkloadStatus::Failed)?;
            return Err(AgentError::Execution(format!(
                "vision sidecar exited with status {status} for workload {}",
                workload.id
            )));
        }

        let results = match tokio::fs::read_to_string(&output_path).await {
            Ok(contents) => serde_json::from_str(&contents).ok(),
            Err(_) => None,
        };
        details.output_path = Some(output_path);
        details.results = results;
        if let WorkloadKind::VisionBatch(v) = &mut workload.kind {
            *v = details;
        }

        self.records.write().unwrap().insert(
            workload.id.clone(),
            BatchRecord { status: ObservedStatus::Completed, log_path },
        );
        workload.transition(WorkloadStatus::Completed)?;
        Ok(())
    }

    async fn stop(&self, workload: &Workload) -> Result<(), AgentError> {
        // Batch runs complete synchronously inside `execute`; nothing to
        // stop once it has returned. Idempotent no-op for a workload that
        // was never started (or already finished).
        let _ = workload;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::quantity::Quantity;

    fn vision_workload(model_type: Option<&str>) -> Workload {
        Workload::new(
            "v1",
            Quantity::new(500, 0, 0, 0),
            WorkloadKind::VisionBatch(VisionBatchDetails {
                task: VisionTask::Detection,
                input_path: "/tmp/frame.jpg".into(),
                output_path: None,
                model_path: Some("models/yolov8n.onnx".into()),
                model_type: model_type.map(str::to_string),
                confidence: 0.5,
                nms_threshold: 0.4,
                results: None,
            }),
        )
    }

    #[test]
    fn unknown_model_type_is_rejected_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let executor = VisionExecutor::new(SidecarBinariesSection::default(), dir.path().to_path_buf());
        let workload = vision_workload(Some("not-a-real-model-kind"));
        let details = match &workload.kind {
            WorkloadKind::VisionBatch(v) => v.clone(),
            _ => unreachable!(),
        };
        assert!(executor.resolve_binary(&details).is_err());
    }

    #[tokio::test]
    async fn sidecar_failure_releases_to_a_failed_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut bin = SidecarBinariesSection::default();
        bin.yolo = "/bin/false".to_string();
        let executor = VisionExecutor::new(bin, dir.path().to_path_buf());
        let mut workload = vision_workload(None);
        let result = executor.execute(&mut workload).await;
        assert!(result.is_err());
        assert_eq!(workload.status, WorkloadStatus::Failed);
    }

    #[tokio::test]
    async fn stop_before_execute_is_a_harmless_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let executor = VisionExecutor::new(SidecarBinariesSection::default(), dir.path().to_path_buf());
        let workload = vision_workload(None);
        assert!(executor.stop(&workload).await.is_ok());
    }
}
