use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::quantity::Quantity;
use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl WorkloadStatus {
    /// Spec §3/§8: terminal states never resurrect without a new id.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkloadStatus::Completed | WorkloadStatus::Failed | WorkloadStatus::Stopped
        )
    }

    /// Whether `self -> next` is a legal transition. Monotone except
    /// `running -> {failed, stopped, completed}`, and terminal states are
    /// sticky.
    pub fn can_transition_to(&self, next: WorkloadStatus) -> bool {
        use WorkloadStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Stopped)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Stopped)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
    pub proto: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host: String,
    pub container: String,
    pub ro: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisionTask {
    Detection,
    FaceDetection,
    Classification,
    Segmentation,
    Tracking,
    Ocr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMethod {
    File,
    Url,
    Path,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Private,
    Public,
    Shared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDetails {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerDetails {
    pub image: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    #[serde(default)]
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceServiceDetails {
    pub model_path: String,
    pub model_type: String,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub config_path: Option<String>,
    pub service_host: String,
    pub service_port: u16,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionBatchDetails {
    pub task: VisionTask,
    pub input_path: String,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default)]
    pub model_type: Option<String>,
    pub confidence: f64,
    pub nms_threshold: f64,
    #[serde(default)]
    pub results: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDetails {
    pub data_key: String,
    pub data_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub content_type: String,
    pub upload_method: UploadMethod,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub file_list: Vec<String>,
    #[serde(default = "default_access_mode")]
    pub access_mode: AccessMode,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub file_path: String,
}

fn default_access_mode() -> AccessMode {
    AccessMode::Private
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataGatewayDetails {
    pub base_path: String,
    pub bucket: String,
    pub service_host: String,
    pub service_port: u16,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Per-variant extension payload. The common base fields live on
/// [`Workload`] itself; this enum only carries what differs between
/// workload kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkloadKind {
    Process(ProcessDetails),
    Container(ContainerDetails),
    InferenceService(InferenceServiceDetails),
    VisionBatch(VisionBatchDetails),
    Data(DataDetails),
    DataGateway(DataGatewayDetails),
}

impl WorkloadKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            WorkloadKind::Process(_) => "process",
            WorkloadKind::Container(_) => "container",
            WorkloadKind::InferenceService(_) => "inference_service",
            WorkloadKind::VisionBatch(_) => "vision_batch",
            WorkloadKind::Data(_) => "data",
            WorkloadKind::DataGateway(_) => "data_gateway",
        }
    }

    /// Batch workloads run to completion synchronously inside the
    /// executor call (spec glossary, §4.4).
    pub fn is_batch(&self) -> bool {
        matches!(self, WorkloadKind::VisionBatch(_) | WorkloadKind::Data(_))
    }

    /// Service workloads expose a long-lived HTTP endpoint supervised by
    /// the agent (spec glossary).
    pub fn is_service(&self) -> bool {
        matches!(
            self,
            WorkloadKind::InferenceService(_) | WorkloadKind::DataGateway(_)
        )
    }
}

/// A workload submitted to the agent. Shares a common base (id, name,
/// status, requirements, timestamps, metadata) across all variants
/// (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub id: String,
    pub name: String,
    pub status: WorkloadStatus,
    pub requirements: Quantity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(flatten)]
    pub kind: WorkloadKind,
}

impl Workload {
    pub fn new(name: impl Into<String>, requirements: Quantity, kind: WorkloadKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            status: WorkloadStatus::Pending,
            requirements,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
            kind,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Applies a status transition, enforcing the monotone-except-running
    /// rule and sticky terminal states (spec §3, §8 property 8).
    pub fn transition(&mut self, next: WorkloadStatus) -> Result<(), AgentError> {
        if !self.status.can_transition_to(next) {
            return Err(AgentError::Validation(format!(
                "illegal status transition for workload {}: {:?} -> {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Type-specific validation that must run before the workload enters
    /// the scheduler (spec §3).
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.name.trim().is_empty() {
            return Err(AgentError::Validation("workload name must not be empty".into()));
        }
        if !self.requirements.is_non_negative() {
            return Err(AgentError::Validation(
                "workload requirements must be non-negative".into(),
            ));
        }
        match &self.kind {
            WorkloadKind::Process(p) => {
                if p.command.trim().is_empty() {
                    return Err(AgentError::Validation("process command must not be empty".into()));
                }
            }
            WorkloadKind::Container(c) => {
                if c.image.trim().is_empty() {
                    return Err(AgentError::Validation("container image must not be empty".into()));
                }
                for p in &c.ports {
                    if p.host == 0 || p.container == 0 {
                        return Err(AgentError::Validation("container port 0 is invalid".into()));
                    }
                }
            }
            WorkloadKind::InferenceService(s) => {
                if s.model_path.trim().is_empty() {
                    return Err(AgentError::Validation("model_path must not be empty".into()));
                }
                if s.service_port == 0 {
                    return Err(AgentError::Validation("service_port must not be 0".into()));
                }
            }
            WorkloadKind::VisionBatch(v) => {
                if v.input_path.trim().is_empty() {
                    return Err(AgentError::Validation("input_path must not be empty".into()));
                }
                if !(0.0..=1.0).contains(&v.confidence) {
                    return Err(AgentError::Validation("confidence must be within [0, 1]".into()));
                }
                if !(0.0..=1.0).contains(&v.nms_threshold) {
                    return Err(AgentError::Validation("nms_threshold must be within [0, 1]".into()));
                }
            }
            WorkloadKind::Data(d) => {
                if d.data_key.trim().is_empty() {
                    return Err(AgentError::Validation("data_key must not be empty".into()));
                }
                match d.upload_method {
                    UploadMethod::Url if d.source_url.is_none() => {
                        return Err(AgentError::Validation(
                            "source_url is required for upload_method=url".into(),
                        ));
                    }
                    UploadMethod::Path if d.source_path.is_none() => {
                        return Err(AgentError::Validation(
                            "source_path is required for upload_method=path".into(),
                        ));
                    }
                    UploadMethod::Directory if d.file_list.is_empty() => {
                        return Err(AgentError::Validation(
                            "file_list must not be empty for upload_method=directory".into(),
                        ));
                    }
                    _ => {}
                }
            }
            WorkloadKind::DataGateway(g) => {
                if g.bucket.trim().is_empty() {
                    return Err(AgentError::Validation("bucket must not be empty".into()));
                }
                if g.service_port == 0 {
                    return Err(AgentError::Validation("service_port must not be 0".into()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process_workload() -> Workload {
        Workload::new(
            "p1",
            Quantity::new(1000, 0, 1_000_000, 0),
            WorkloadKind::Process(ProcessDetails {
                command: "sleep".into(),
                args: vec!["1".into()],
                env: HashMap::new(),
                working_dir: None,
                pid: None,
                exit_code: None,
            }),
        )
    }

    #[test]
    fn valid_process_workload_passes_validation() {
        assert!(process_workload().validate().is_ok());
    }

    #[test]
    fn empty_command_fails_validation() {
        let mut w = process_workload();
        if let WorkloadKind::Process(p) = &mut w.kind {
            p.command.clear();
        }
        assert!(w.validate().is_err());
    }

    #[test]
    fn status_transitions_are_monotone_and_terminal_is_sticky() {
        let mut w = process_workload();
        assert_eq!(w.status, WorkloadStatus::Pending);
        w.transition(WorkloadStatus::Running).unwrap();
        w.transition(WorkloadStatus::Completed).unwrap();
        assert!(w.transition(WorkloadStatus::Running).is_err());
        assert!(w.transition(WorkloadStatus::Pending).is_err());
    }

    #[test]
    fn cannot_skip_from_pending_to_completed() {
        let mut w = process_workload();
        assert!(w.transition(WorkloadStatus::Completed).is_err());
    }
}
