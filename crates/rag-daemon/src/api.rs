// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire types for the daemon's HTTP surface: request/response envelopes and
//! the error shape every handler converges on.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use rag_error::RagErrorDto;

/// `POST /pipeline/run` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct RunSubmission {
    /// Path to a pipeline YAML file, resolved against the daemon's
    /// configured pipelines root.
    pub pipeline_path: String,
    /// The user's raw query.
    pub user_query: String,
    /// Session identifier; history and repeat-query detection are scoped to
    /// this.
    pub session_id: String,
    /// Opaque caller identifier.
    pub consultant: String,
    /// Idempotency key for conversation history. Generated if omitted.
    pub request_id: Option<String>,
    /// Authenticated user/identity id, if any.
    pub user_id: Option<String>,
    /// Target repository, if the pipeline requires one.
    pub repository: Option<String>,
    /// Primary snapshot id.
    pub snapshot_id: Option<String>,
    /// Secondary snapshot id, for pipelines using `parallel_roads`.
    pub snapshot_id_b: Option<String>,
    /// Snapshot-set id, for membership checks.
    pub snapshot_set_id: Option<String>,
    /// Source-control branch, required by `fetch_node_texts`.
    pub branch: Option<String>,
}

/// `POST /pipeline/run` response: the run has been accepted and is
/// executing in the background. Callers attach to
/// `/pipeline/stream/{dev,prod}?run_id=…` to observe it.
#[derive(Debug, Clone, Serialize)]
pub struct RunAccepted {
    /// The run id to stream.
    pub run_id: String,
}

/// `GET /health` response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` if the process can answer at all.
    pub status: &'static str,
    /// Server time at response construction.
    pub time: String,
    /// Crate version, for client compatibility checks.
    pub version: &'static str,
}

/// The daemon's uniform error response body: `{"error": {...}}`.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status to respond with.
    pub status: StatusCode,
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// Build an error with an explicit status, code, and message.
    #[must_use]
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { status, code: code.into(), message: message.into() }
    }

    /// `400 Bad Request`.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// `404 Not Found`.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// `401 Unauthorized`.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }
}

impl From<&rag_error::RagError> for ApiError {
    fn from(err: &rag_error::RagError) -> Self {
        let dto = RagErrorDto::from(err);
        let status = match dto.category {
            rag_error::ErrorCategory::Configuration | rag_error::ErrorCategory::Contract => {
                StatusCode::BAD_REQUEST
            }
            rag_error::ErrorCategory::Security => StatusCode::FORBIDDEN,
            rag_error::ErrorCategory::Budget | rag_error::ErrorCategory::State => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            rag_error::ErrorCategory::Collaborator | rag_error::ErrorCategory::Io => {
                StatusCode::BAD_GATEWAY
            }
        };
        Self { status, code: dto.code, message: dto.message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": { "code": self.code, "message": self.message } }));
        (self.status, body).into_response()
    }
}
