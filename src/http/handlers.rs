use axum::extract::{Multipart, Path, State};
use axum::Json;
use prometheus::{Encoder, TextEncoder};

use super::dto::{
    HealthResponse, HeartbeatRequest, LogsResponse, ParentNodeInfo, RegisterNodeRequest, RegisterNodeResponse,
    ResourceStatsResponse, ResourcesResponse, SubmitWorkloadRequest, UnregisterNodeRequest, WorkloadResponse,
};
use crate::error::AgentError;
use crate::model::workload::{AccessMode, DataDetails, UploadMethod, WorkloadKind};
use crate::model::{NodeCapacity, Quantity, Workload};
use crate::AgentState;

pub async fn submit_workload(
    State(state): State<AgentState>,
    Json(request): Json<SubmitWorkloadRequest>,
) -> Result<Json<WorkloadResponse>, AgentError> {
    let workload = request.into_workload()?;
    let workload = state.scheduler.submit(workload).await?;
    Ok(Json(workload.into()))
}

/// Multipart upload for `Data` workloads submitted as a file rather than
/// a URL or path. Stages the file under the configured data root, then
/// funnels it through the same scheduler path as any other workload.
pub async fn upload_data_workload(
    State(state): State<AgentState>,
    mut multipart: Multipart,
) -> Result<Json<WorkloadResponse>, AgentError> {
    let mut data_key = None;
    let mut staged_path = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AgentError::Validation(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "data_key" => {
                data_key = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AgentError::Validation(format!("invalid data_key field: {e}")))?,
                );
            }
            "file" => {
                let file_name = field.file_name().unwrap_or("upload.bin").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AgentError::Validation(format!("invalid file field: {e}")))?;
                let staging_dir = state.config.data.data_root.clone() + "/uploads";
                tokio::fs::create_dir_all(&staging_dir).await?;
                let path = format!("{staging_dir}/{}-{file_name}", uuid::Uuid::new_v4());
                tokio::fs::write(&path, &bytes).await?;
                staged_path = Some(path);
            }
            _ => {}
        }
    }

    let staged_path = staged_path.ok_or_else(|| AgentError::Validation("multipart body is missing a 'file' field".into()))?;
    let data_key = data_key.unwrap_or_else(|| format!("uploads/{}", uuid::Uuid::new_v4()));

    let workload = Workload::new(
        data_key.clone(),
        Quantity::new(0, 0, 0, 0),
        WorkloadKind::Data(DataDetails {
            data_key,
            data_type: "blob".to_string(),
            size: 0,
            hash: String::new(),
            content_type: String::new(),
            upload_method: UploadMethod::File,
            source_url: None,
            source_path: Some(staged_path),
            file_list: Vec::new(),
            access_mode: AccessMode::Private,
            tags: Vec::new(),
            file_path: String::new(),
        }),
    );

    let workload = state.scheduler.submit(workload).await?;
    Ok(Json(workload.into()))
}

pub async fn list_workloads(State(state): State<AgentState>) -> Json<Vec<WorkloadResponse>> {
    Json(state.scheduler.list_workloads().into_iter().map(Into::into).collect())
}

pub async fn get_workload(
    State(state): State<AgentState>,
    Path(workload_id): Path<String>,
) -> Result<Json<WorkloadResponse>, AgentError> {
    state
        .scheduler
        .get_workload(&workload_id)
        .map(|w| Json(w.into()))
        .ok_or_else(|| AgentError::NotFound(format!("unknown workload: {workload_id}")))
}

pub async fn stop_workload(
    State(state): State<AgentState>,
    Path(workload_id): Path<String>,
) -> Result<Json<serde_json::Value>, AgentError> {
    state.scheduler.stop_workload(&workload_id).await?;
    Ok(Json(serde_json::json!({ "stopped": workload_id })))
}

pub async fn get_workload_logs(
    State(state): State<AgentState>,
    Path(workload_id): Path<String>,
) -> Result<Json<LogsResponse>, AgentError> {
    let lines = state.scheduler.get_workload_logs(&workload_id, 200).await?;
    Ok(Json(LogsResponse { workload_id, lines }))
}

pub async fn get_resources(State(state): State<AgentState>) -> Json<ResourcesResponse> {
    Json(ResourcesResponse {
        local: state.registry.get_local(),
        children: state.registry.get_children(),
        peers: state.registry.get_peers(),
        parent: state.registry.get_parent(),
    })
}

pub async fn get_resource_stats(State(state): State<AgentState>) -> Json<ResourceStatsResponse> {
    let local = state.registry.get_local();
    Json(ResourceStatsResponse {
        total: local.total,
        available: local.available,
        used: local.used,
        allocation_count: state.registry.allocation_count(),
    })
}

pub async fn get_nodes(State(state): State<AgentState>) -> Json<Vec<NodeCapacity>> {
    let mut nodes = state.registry.get_children();
    nodes.extend(state.registry.get_peers());
    Json(nodes)
}

pub async fn get_local_node(State(state): State<AgentState>) -> Json<NodeCapacity> {
    Json(state.registry.get_local())
}

/// A child agent registering itself with this (parent) node on its own
/// startup, or on a later reconnect.
pub async fn register_node(
    State(state): State<AgentState>,
    Json(request): Json<RegisterNodeRequest>,
) -> Result<Json<RegisterNodeResponse>, AgentError> {
    state.registry.register_child(&request.node_id, request.capacity)?;
    let local = state.registry.get_local();
    let address = format!("{}:{}", state.config.agent.address, state.config.agent.port);
    Ok(Json(RegisterNodeResponse {
        parent_node: ParentNodeInfo { node_id: local.node_id, address },
    }))
}

pub async fn unregister_node(
    State(state): State<AgentState>,
    Json(request): Json<UnregisterNodeRequest>,
) -> Result<Json<serde_json::Value>, AgentError> {
    state.registry.unregister(&request.node_id)?;
    Ok(Json(serde_json::json!({ "unregistered": request.node_id })))
}

/// Spec §6: "unknown id → 500" — deliberately not the 404 other
/// not-found lookups in this API return, since a heartbeat from a node
/// this agent never registered indicates an inconsistent overlay state
/// on the caller's side, not a routine client error.
pub async fn heartbeat(
    State(state): State<AgentState>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<serde_json::Value>, axum::response::Response> {
    use axum::response::IntoResponse;
    state.registry.update_node(&request.node_id, request.capacity).map_err(|_| {
        (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "unknown_node", "message": format!("unknown node: {}", request.node_id) })),
        )
            .into_response()
    })?;
    Ok(Json(serde_json::json!({ "acknowledged": request.node_id })))
}

pub async fn register_peer(
    State(state): State<AgentState>,
    Json(request): Json<RegisterNodeRequest>,
) -> Result<Json<RegisterNodeResponse>, AgentError> {
    state.registry.register_peer(&request.node_id, request.capacity)?;
    let local = state.registry.get_local();
    let address = format!("{}:{}", state.config.agent.address, state.config.agent.port);
    Ok(Json(RegisterNodeResponse {
        parent_node: ParentNodeInfo { node_id: local.node_id, address },
    }))
}

pub async fn unregister_peer(
    State(state): State<AgentState>,
    Json(request): Json<UnregisterNodeRequest>,
) -> Result<Json<serde_json::Value>, AgentError> {
    state.registry.unregister(&request.node_id)?;
    Ok(Json(serde_json::json!({ "unregistered": request.node_id })))
}

pub async fn health(State(state): State<AgentState>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", node_id: state.registry.get_local().node_id })
}

pub async fn metrics(State(state): State<AgentState>) -> Result<String, AgentError> {
    if let Some(metrics) = &state.metrics {
        state.registry.refresh_gauges(metrics);
    }
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = state.prometheus_registry.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| AgentError::Fatal(format!("failed to encode metrics: {e}")))?;
    String::from_utf8(buffer).map_err(|e| AgentError::Fatal(format!("metrics encoding produced invalid utf8: {e}")))
}
