//! Outbound delegation: when the local scheduler cannot (or chooses not
//! to) run a workload itself, it POSTs the workload to a neighbour's
//! `/api/workloads` endpoint and reconciles the remote id into local
//! metadata.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::HttpClientSection;
use crate::error::AgentError;
use crate::model::{NodeCapacity, NodeStatus, Quantity, Workload};

#[derive(Debug, Deserialize)]
struct RemoteWorkloadResponse {
    id: String,
}

/// Wire shape for `POST /api/workloads`, spec §4.3/§6:
/// `{name, type, requirements, config}` — not the full [`Workload`],
/// which also carries `id`/`status`/timestamps that are only ever
/// assigned server-side by the receiving agent.
#[derive(Debug, Serialize)]
struct SubmitWorkloadBody {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    requirements: Quantity,
    config: serde_json::Value,
}

/// Builds the spec §4.3 delegation body from a local `Workload`: `config`
/// is the workload's type-specific payload (its serialized `kind`, minus
/// the redundant `type` tag already carried at the top level).
fn build_submit_body(workload: &Workload) -> Result<SubmitWorkloadBody, AgentError> {
    let mut kind_value = serde_json::to_value(&workload.kind)
        .map_err(|e| AgentError::Delegation(format!("failed to serialize workload payload: {e}")))?;
    if let serde_json::Value::Object(map) = &mut kind_value {
        map.remove("type");
    }
    Ok(SubmitWorkloadBody {
        name: workload.name.clone(),
        type_name: workload.type_name().to_string(),
        requirements: workload.requirements,
        config: kind_value,
    })
}

/// Thin wrapper over a `reqwest::Client` tuned from configuration,
/// mirroring the way the pack's HTTP clients are built centrally rather
/// than ad hoc per call site.
#[derive(Clone)]
pub struct DelegationClient {
    http: reqwest::Client,
}

impl DelegationClient {
    pub fn new(config: &HttpClientSection) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(AgentError::from)?;
        Ok(Self { http })
    }

    /// Delegates `workload` to the node described by `target`. Refuses to
    /// delegate to a node that isn't `Active`, and to a node with no known
    /// address. On success, stamps `delegated`, `delegated_to`, and
    /// `remote_workload_id` into the workload's metadata.
    pub async fn delegate(&self, target: &NodeCapacity, workload: &mut Workload) -> Result<(), AgentError> {
        if target.status != NodeStatus::Active {
            return Err(AgentError::Delegation(format!(
                "refusing to delegate to inactive node {}",
                target.node_id
            )));
        }
        let address = target
            .address
            .as_ref()
            .ok_or_else(|| AgentError::Delegation(format!("node {} has no registered address", target.node_id)))?;

        let url = format!("{}/api/workloads", address.trim_end_matches('/'));
        let body = build_submit_body(workload)?;
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Delegation(format!("delegation POST to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AgentError::Delegation(format!(
                "node {} rejected delegated workload with status {}",
                target.node_id,
                response.status()
            )));
        }

        let remote: RemoteWorkloadResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Delegation(format!("malformed delegation response: {e}")))?;

        workload.metadata.insert("delegated".to_string(), "true".to_string());
        workload.metadata.insert("delegated_to".to_string(), target.node_id.clone());
        workload.metadata.insert("remote_workload_id".to_string(), remote.id);
        Ok(())
    }

    /// Used by the overlay bootstrap for heartbeat delivery, which shares
    /// the same "POST JSON, expect 2xx" shape as delegation but doesn't
    /// need a typed response.
    pub async fn post_json<T: serde::Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<(), AgentError> {
        self.post_json_response::<T, serde_json::Value>(url, body).await?;
        Ok(())
    }

    /// Same as [`Self::post_json`] but decodes the response body, used by
    /// the overlay bootstrap's self-registration call (spec §6: "Register
    /// returns `{parent_node: {node_id, address}}`").
    pub async fn post_json_response<T, R>(&self, url: &str, body: &T) -> Result<R, AgentError>
    where
        T: serde::Serialize + ?Sized,
        R: for<'de> serde::Deserialize<'de>,
    {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::Delegation(format!("POST to {url} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(AgentError::Delegation(format!(
                "{url} responded with status {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AgentError::Delegation(format!("malformed response from {url}: {e}")))
    }

    pub fn timeout(&self) -> Duration {
        // reqwest::Client doesn't expose its configured timeout back; kept
        // here only as a documented default for callers that need one.
        Duration::from_secs(30)
    }
}
