//! HTTP surface: a single axum router wired to [`AgentState`], with
//! request tracing and permissive CORS layered on the way the pack's
//! axum services do it.

pub mod dto;
pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AgentState;

pub fn router(state: AgentState) -> Router {
    Router::new()
        .route("/api/workloads", get(handlers::list_workloads).post(handlers::submit_workload))
        .route("/api/workloads/upload", post(handlers::upload_data_workload))
        .route("/api/workloads/:id", get(handlers::get_workload).delete(handlers::stop_workload))
        .route("/api/workloads/:id/stop", post(handlers::stop_workload))
        .route("/api/workloads/:id/logs", get(handlers::get_workload_logs))
        .route("/api/resources", get(handlers::get_resources))
        .route("/api/resources/stats", get(handlers::get_resource_stats))
        .route("/api/nodes", get(handlers::get_nodes))
        .route("/api/nodes/local", get(handlers::get_local_node))
        .route("/api/register", post(handlers::register_node))
        .route("/api/unregister", post(handlers::unregister_node))
        .route("/api/heartbeat", post(handlers::heartbeat))
        .route("/api/peer/register", post(handlers::register_peer))
        .route("/api/peer/unregister", post(handlers::unregister_peer))
        .route("/api/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
