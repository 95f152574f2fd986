// SPDX-License-Identifier: MIT OR Apache-2.0
//! rag-daemon
//!
//! The HTTP control plane: pipeline run submission and the work-callback
//! SSE streams (`/pipeline/stream/dev`, `/pipeline/stream/prod`), backed by
//! [`rag_broker::Broker`]. A submitted run executes in a background task;
//! the handler returns a `run_id` immediately and callers attach to the
//! stream endpoints to observe it.

mod api;
pub mod middleware;
mod policy;
mod sse;

pub use api::{ApiError, HealthResponse, RunAccepted, RunSubmission};
pub use policy::GlobalPolicyConfig;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use uuid::Uuid;

use rag_actions::demo::demo_collaborators;
use rag_actions::register_all;
use rag_broker::Broker;
use rag_core::state::State as PipelineState;
use rag_engine::{Engine, Runtime as EngineRuntime};
use rag_loader::Loader;

/// Shared daemon state.
pub struct AppState {
    /// The work-callback broker every submitted run streams through.
    pub broker: Arc<Broker>,
    /// Directory `pipeline_path` in run submissions is resolved against.
    pub pipelines_root: PathBuf,
    /// The action registry every submitted run dispatches through.
    pub engine: Arc<Engine>,
    /// Per-run engine settings (tracing, inbox fail-fast).
    pub engine_runtime: EngineRuntime,
    /// The operator's global work-callback policy.
    pub global_policy: GlobalPolicyConfig,
    /// Whether `/pipeline/stream/dev` is reachable at all.
    pub dev_enabled: bool,
    /// Bearer token `/pipeline/stream/prod` requires, if auth is enforced.
    pub prod_bearer_token: Option<String>,
}

impl AppState {
    /// Build daemon state with the built-in demo collaborators. A real
    /// deployment would substitute live retrieval/graph/model/history
    /// collaborators here.
    #[must_use]
    pub fn new(pipelines_root: PathBuf, global_policy: GlobalPolicyConfig, dev_enabled: bool, prod_bearer_token: Option<String>) -> Self {
        let registry = register_all(demo_collaborators());
        Self {
            broker: Arc::new(Broker::new()),
            pipelines_root,
            engine: Arc::new(Engine::new(registry)),
            engine_runtime: EngineRuntime::from_env(),
            global_policy,
            dev_enabled,
            prod_bearer_token,
        }
    }
}

/// Build the Axum router with every daemon route.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/schema/pipeline", get(cmd_schema_pipeline))
        .route("/schema/callback-policy", get(cmd_schema_callback_policy))
        .route("/pipeline/run", post(cmd_run))
        .route("/pipeline/stream/dev", get(cmd_stream_dev))
        .route("/pipeline/stream/prod", get(cmd_stream_prod))
        .with_state(state)
}

async fn cmd_health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok", time: Utc::now().to_rfc3339(), version: env!("CARGO_PKG_VERSION") })
}

async fn cmd_schema_pipeline() -> impl IntoResponse {
    Json(serde_json::json!({
        "type": "object",
        "required": ["name", "settings", "steps"],
        "properties": {
            "name": { "type": "string" },
            "extends": { "type": "string", "description": "bare name resolved under pipelines_root" },
            "settings": {
                "type": "object",
                "description": "free-form settings bag; must carry entry_step_id",
                "required": ["entry_step_id"],
            },
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "action"],
                    "properties": {
                        "id": { "type": "string" },
                        "action": { "type": "string", "description": "name of a registered action" },
                        "next": { "type": "string" },
                        "end": { "type": "boolean" },
                    },
                },
            },
        },
    }))
}

async fn cmd_schema_callback_policy() -> impl IntoResponse {
    Json(serde_json::json!({
        "type": "object",
        "properties": {
            "enabled": { "type": "boolean" },
            "include_documents": { "type": "boolean" },
            "router_visibility": { "enum": ["show", "hide"] },
            "retrieval_visibility": { "enum": ["show", "hide"] },
            "model_call_visibility": { "enum": ["show", "hide"] },
        },
        "description": "resolved by ANDing global and pipeline preferences; global=forbidden always disables, global=allowed always enables, global=pipeline_decision defers to the pipeline's work_callback_mode setting",
    }))
}

async fn cmd_run(State(state): State<Arc<AppState>>, Json(req): Json<RunSubmission>) -> Result<impl IntoResponse, ApiError> {
    let path = state.pipelines_root.join(&req.pipeline_path);
    let loader = Loader::new(state.pipelines_root.clone());
    let pipeline = loader.load_pipeline_file(&path).map_err(|e| ApiError::from(&e))?;

    let policy = policy::resolve(&state.global_policy, &pipeline);
    let run_id = Uuid::new_v4().to_string();
    state.broker.open_run(run_id.clone(), policy, Utc::now());

    let mut run_state = PipelineState::new(req.user_query, req.session_id, req.consultant);
    run_state.request_id = Some(req.request_id.unwrap_or_else(|| Uuid::new_v4().to_string()));
    run_state.user_id = req.user_id;
    run_state.repository = req.repository;
    run_state.snapshot_id = req.snapshot_id;
    run_state.snapshot_id_b = req.snapshot_id_b;
    run_state.snapshot_set_id = req.snapshot_set_id;
    run_state.branch = req.branch;

    let engine = Arc::clone(&state.engine);
    let engine_runtime = state.engine_runtime;
    let broker = Arc::clone(&state.broker);
    let run_id_for_task = run_id.clone();

    tokio::spawn(async move {
        let outcome = engine.run(&pipeline, &mut run_state, &engine_runtime).await;

        for event in &run_state.pipeline_trace_events {
            broker.emit(&run_id_for_task, event, &run_state, Utc::now());
        }

        let reason = match outcome {
            Ok(()) => "run_complete".to_string(),
            Err(err) => format!("run_failed:{}", err.code().as_str()),
        };
        broker.close_run(&run_id_for_task, reason, Utc::now());
    });

    Ok((StatusCode::ACCEPTED, Json(RunAccepted { run_id })))
}

fn resolve_run_id(params: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    params
        .get("run_id")
        .cloned()
        .or_else(|| headers.get("x-run-id").and_then(|v| v.to_str().ok()).map(str::to_string))
        .filter(|s| !s.is_empty())
}

fn bearer_is_valid(headers: &HeaderMap, expected: &str) -> bool {
    let Some(header) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    header.strip_prefix("Bearer ").map(str::trim) == Some(expected)
}

fn open_stream(state: &AppState, run_id: &str) -> Result<rag_broker::StreamHandle, ApiError> {
    state.broker.open_stream(run_id).ok_or_else(|| ApiError::not_found(format!("unknown run '{run_id}'")))
}

async fn cmd_stream_dev(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if !state.dev_enabled {
        return Err(ApiError::not_found("dev stream disabled"));
    }
    let run_id = resolve_run_id(&params, &headers).ok_or_else(|| ApiError::bad_request("missing run_id"))?;
    let handle = open_stream(&state, &run_id)?;
    Ok(sse::stream_handle_to_sse(handle))
}

async fn cmd_stream_prod(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = &state.prod_bearer_token {
        if !bearer_is_valid(&headers, token) {
            return Err(ApiError::unauthorized("missing or invalid bearer token"));
        }
    }
    let run_id = resolve_run_id(&params, &headers).ok_or_else(|| ApiError::bad_request("missing run_id"))?;
    let handle = open_stream(&state, &run_id)?;
    Ok(sse::stream_handle_to_sse(handle))
}
