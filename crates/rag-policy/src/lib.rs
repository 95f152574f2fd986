// SPDX-License-Identifier: MIT OR Apache-2.0
//! Work-callback policy precedence resolution.
//!
//! A run's effective [`CallbackPolicy`] is built from two inputs: an
//! operator-controlled global mode and a pipeline's own declared
//! preference. Resolution follows the same "most restrictive input wins,
//! unless it explicitly defers" shape as a composed deny/allow policy
//! engine, specialized to the two-input case the work-callback broker
//! needs.

use rag_core::callback::{
    CallbackPolicy, GlobalCallbackMode, PipelineCallbackMode, StageVisibility,
};

/// Per-stage visibility preferences a global config or pipeline can declare.
#[derive(Debug, Clone, Copy)]
pub struct StagePreferences {
    /// Router/classification stage.
    pub router: StageVisibility,
    /// Retrieval stage.
    pub retrieval: StageVisibility,
    /// Model-call stage.
    pub model_call: StageVisibility,
}

impl StagePreferences {
    /// All stages shown.
    #[must_use]
    pub fn all_shown() -> Self {
        Self {
            router: StageVisibility::Show,
            retrieval: StageVisibility::Show,
            model_call: StageVisibility::Show,
        }
    }

    /// All stages hidden.
    #[must_use]
    pub fn all_hidden() -> Self {
        Self {
            router: StageVisibility::Hide,
            retrieval: StageVisibility::Hide,
            model_call: StageVisibility::Hide,
        }
    }
}

/// Resolve whether callbacks are enabled at all.
///
/// - `Forbidden` at the global level always wins: no amount of pipeline
///   preference can turn callbacks back on.
/// - `Allowed` at the global level always wins the other way: callbacks
///   stream regardless of what the pipeline declares.
/// - `PipelineDecision` defers entirely to the pipeline's own preference.
#[must_use]
pub fn resolve_enabled(global: GlobalCallbackMode, pipeline: PipelineCallbackMode) -> bool {
    match global {
        GlobalCallbackMode::Forbidden => false,
        GlobalCallbackMode::Allowed => true,
        GlobalCallbackMode::PipelineDecision => matches!(pipeline, PipelineCallbackMode::Allowed),
    }
}

/// Resolve a single stage's visibility. A stage is shown only if both the
/// global and pipeline preferences show it — either side can hide a stage,
/// neither side can force it on alone.
#[must_use]
pub fn resolve_stage_visibility(global: StageVisibility, pipeline: StageVisibility) -> StageVisibility {
    if global == StageVisibility::Show && pipeline == StageVisibility::Show {
        StageVisibility::Show
    } else {
        StageVisibility::Hide
    }
}

/// Common misspellings/aliases of the stage tokens pipelines and config
/// files use, normalized to the canonical form used by
/// [`StagePreferences`]. Returns `None` for anything unrecognized.
#[must_use]
pub fn normalize_stage_token(raw: &str) -> Option<&'static str> {
    match raw.trim().to_lowercase().as_str() {
        "router" | "routing" | "route" | "classification" | "classifier" => Some("router"),
        "retrieval" | "search" | "retreival" | "searching" => Some("retrieval"),
        "model_call" | "model" | "modelcall" | "llm" | "call_model" => Some("model_call"),
        _ => None,
    }
}

/// Resolve the full effective [`CallbackPolicy`] for a run.
///
/// `include_documents` is resolved by AND: document identifiers are
/// included in retrieval summaries only when both the global config and
/// the pipeline agree to include them.
#[must_use]
pub fn resolve_callback_policy(
    global_mode: GlobalCallbackMode,
    pipeline_mode: PipelineCallbackMode,
    global_stages: StagePreferences,
    pipeline_stages: StagePreferences,
    global_include_documents: bool,
    pipeline_include_documents: bool,
) -> CallbackPolicy {
    let enabled = resolve_enabled(global_mode, pipeline_mode);
    if !enabled {
        return CallbackPolicy::disabled();
    }
    CallbackPolicy {
        enabled,
        include_documents: global_include_documents && pipeline_include_documents,
        router_visibility: resolve_stage_visibility(global_stages.router, pipeline_stages.router),
        retrieval_visibility: resolve_stage_visibility(
            global_stages.retrieval,
            pipeline_stages.retrieval,
        ),
        model_call_visibility: resolve_stage_visibility(
            global_stages.model_call,
            pipeline_stages.model_call,
        ),
    }
}
