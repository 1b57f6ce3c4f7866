//! HTTP error mapping for harness failures.

use anyhow::Context;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use harness::error::HarnessError;
use harness::io::transport::{CODE_INTERNAL, CODE_INVALID_PARAMS, CODE_NOT_SUPPORTED};
use serde_json::json;
use tracing::warn;

/// Any handler failure; the status comes from the typed class in the chain.
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match HarnessError::find(&self.0) {
            Some(HarnessError::NotFound { .. } | HarnessError::SessionNotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            Some(HarnessError::AlreadyActive { .. }) => StatusCode::CONFLICT,
            Some(HarnessError::Protocol(_)) => StatusCode::BAD_REQUEST,
            Some(HarnessError::GenerationParse { .. }) => StatusCode::BAD_GATEWAY,
            Some(HarnessError::ServiceUnavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Some(HarnessError::NotSupported { .. }) => StatusCode::NOT_IMPLEMENTED,
            Some(HarnessError::AgentUnready { .. }) | None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = format!("{:#}", self.0);
        if status.is_server_error() {
            warn!(%status, %detail, "request failed");
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// JSON-RPC error code for an agent failure.
pub fn rpc_code(err: &anyhow::Error) -> i64 {
    match HarnessError::find(err) {
        Some(HarnessError::NotSupported { .. }) => CODE_NOT_SUPPORTED,
        Some(HarnessError::Protocol(_)) => CODE_INVALID_PARAMS,
        _ => CODE_INTERNAL,
    }
}

/// Run blocking harness work off the async executor.
pub async fn blocking<T, F>(work: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("blocking task failed")?
}
