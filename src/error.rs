use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// The error taxonomy from spec §7, as a flat `thiserror` enum in the
/// style of the teacher's per-service error type
/// (`cloud-debugging-service::auth::DebuggingServiceAuthError`): one
/// variant per failure class, `#[error("...")]` messages, `From` impls
/// for the library errors each variant wraps.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("insufficient resources: {0}")]
    InsufficientResources(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("delegation error: {0}")]
    Delegation(String),

    #[error("stop error: {0}")]
    Stop(String),

    #[error("fatal invariant violation: {0}")]
    Fatal(String),
}

impl AgentError {
    fn status_code(&self) -> StatusCode {
        match self {
            AgentError::Validation(_) => StatusCode::BAD_REQUEST,
            AgentError::InsufficientResources(_) => StatusCode::CONFLICT,
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AgentError::Delegation(_) => StatusCode::BAD_GATEWAY,
            AgentError::Stop(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AgentError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AgentError::Validation(_) => "validation_error",
            AgentError::InsufficientResources(_) => "insufficient_resources",
            AgentError::NotFound(_) => "not_found",
            AgentError::Execution(_) => "execution_error",
            AgentError::Delegation(_) => "delegation_error",
            AgentError::Stop(_) => "stop_error",
            AgentError::Fatal(_) => "fatal",
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(error: reqwest::Error) -> Self {
        AgentError::Delegation(error.to_string())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(error: std::io::Error) -> Self {
        AgentError::Execution(error.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(error: serde_json::Error) -> Self {
        AgentError::Validation(error.to_string())
    }
}

/// Translates a core error into an HTTP response. No core component
/// depends on axum directly; only this impl and the handler layer (spec
/// §6, out-of-core glue) do.
impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
