//! The executor abstraction (spec §4.4): four operations dispatched by
//! workload type through a factory, with an additional capability trait
//! for workloads that hold a long-lived endpoint.

pub mod container;
pub mod data;
pub mod process;
pub mod service;
pub mod vision;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AgentError;
use crate::model::Workload;

/// Observed status of a workload as seen by its executor, which may
/// differ from the workload's stored status (e.g. a process died without
/// notifying anyone) — spec §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedStatus {
    Running,
    Completed,
    Failed,
    Stopped,
    Unknown,
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Starts the work. Returns once the work has successfully started,
    /// except for batch workloads (vision, data) whose semantics are to
    /// run to completion synchronously.
    async fn execute(&self, workload: &mut Workload) -> Result<(), AgentError>;

    /// Graceful stop; must be idempotent on re-entry after a failed prior
    /// stop.
    async fn stop(&self, workload: &Workload) -> Result<(), AgentError>;

    /// Last-n lines of captured stdout/stderr; empty if unavailable.
    async fn get_logs(&self, workload: &Workload, lines: usize) -> Result<Vec<String>, AgentError>;

    async fn get_status(&self, workload: &Workload) -> ObservedStatus;
}

/// Extension for executors that manage a long-lived service endpoint
/// (spec §4.4, §4.6).
#[async_trait]
pub trait ServiceExecutor: Executor {
    async fn get_endpoint(&self, workload_id: &str) -> Option<String>;
    async fn health_check(&self, workload_id: &str) -> Result<(), AgentError>;
}

/// Maps a workload type tag to its executor. Returns a not-found error
/// for unknown types (spec §4.4).
#[derive(Clone, Default)]
pub struct ExecutorFactory {
    executors: HashMap<&'static str, Arc<dyn Executor>>,
}

impl ExecutorFactory {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn register(&mut self, type_name: &'static str, executor: Arc<dyn Executor>) {
        self.executors.insert(type_name, executor);
    }

    pub fn get(&self, type_name: &str) -> Result<Arc<dyn Executor>, AgentError> {
        self.executors
            .get(type_name)
            .cloned()
            .ok_or_else(|| AgentError::NotFound(format!("no executor registered for workload type '{type_name}'")))
    }
}
