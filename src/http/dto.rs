//! Request/response bodies for the HTTP surface. Kept separate from the
//! domain model so the wire shape can evolve independently of it.

use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::model::workload::WorkloadKind;
use crate::model::{NodeCapacity, Quantity, Workload};

/// Spec §6: submission body is `{name, type, requirements, config}`, not
/// a full [`Workload`] — `id`, `status`, and the timestamps are assigned
/// server-side, never taken from the caller. `config` carries whatever
/// fields the named `type` needs (`command`/`args` for a process,
/// `model_path`/`service_port` for an inference service, and so on).
#[derive(Debug, Deserialize)]
pub struct SubmitWorkloadRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub requirements: Quantity,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl SubmitWorkloadRequest {
    /// Reassembles `config` and `type` into a [`WorkloadKind`] (which is
    /// itself an internally-tagged `{"type": ..., ...fields}` enum) and
    /// constructs a fresh [`Workload`] from it, with a server-assigned id
    /// and `pending` status.
    pub fn into_workload(self) -> Result<Workload, AgentError> {
        let mut kind_value = match self.config {
            serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
            other @ serde_json::Value::Object(_) => other,
            _ => return Err(AgentError::Validation("config must be a JSON object".into())),
        };
        if let serde_json::Value::Object(map) = &mut kind_value {
            map.insert("type".to_string(), serde_json::Value::String(self.type_name.clone()));
        }
        let kind: WorkloadKind = serde_json::from_value(kind_value).map_err(|e| {
            AgentError::Validation(format!("invalid config for workload type '{}': {e}", self.type_name))
        })?;
        Ok(Workload::new(self.name, self.requirements, kind))
    }
}

#[derive(Debug, Serialize)]
pub struct WorkloadResponse {
    #[serde(flatten)]
    pub workload: Workload,
}

impl From<Workload> for WorkloadResponse {
    fn from(workload: Workload) -> Self {
        Self { workload }
    }
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub workload_id: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ResourcesResponse {
    pub local: NodeCapacity,
    pub children: Vec<NodeCapacity>,
    pub peers: Vec<NodeCapacity>,
    pub parent: Option<NodeCapacity>,
}

#[derive(Debug, Serialize)]
pub struct ResourceStatsResponse {
    pub total: Quantity,
    pub available: Quantity,
    pub used: Quantity,
    pub allocation_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    pub node_id: String,
    pub capacity: NodeCapacity,
}

#[derive(Debug, Serialize)]
pub struct ParentNodeInfo {
    pub node_id: String,
    pub address: String,
}

/// Spec §6: register returns `{parent_node: {node_id, address}}` so the
/// newly-registered child learns how to reach its parent (this node).
#[derive(Debug, Serialize)]
pub struct RegisterNodeResponse {
    pub parent_node: ParentNodeInfo,
}

#[derive(Debug, Deserialize)]
pub struct UnregisterNodeRequest {
    pub node_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: String,
    pub capacity: NodeCapacity,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub node_id: String,
}
