// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reads a pipeline's declared work-callback preferences out of its
//! `settings` bag and combines them with the daemon's operator-controlled
//! global policy via [`rag_policy::resolve_callback_policy`].
//!
//! Recognized settings keys: `work_callback_mode` (`"allowed"` or
//! `"forbidden"`), `work_callback_include_documents` (bool), and
//! `work_callback_stages` (a mapping of stage token to `"show"`/`"hide"`,
//! keys normalized via [`rag_policy::normalize_stage_token`]).

use rag_core::callback::{CallbackPolicy, GlobalCallbackMode, PipelineCallbackMode, StageVisibility};
use rag_core::pipeline::PipelineDef;
use rag_policy::{normalize_stage_token, resolve_callback_policy, StagePreferences};

/// The daemon operator's global work-callback policy, set once at startup.
#[derive(Debug, Clone, Copy)]
pub struct GlobalPolicyConfig {
    pub mode: GlobalCallbackMode,
    pub stages: StagePreferences,
    pub include_documents: bool,
}

impl Default for GlobalPolicyConfig {
    fn default() -> Self {
        Self {
            mode: GlobalCallbackMode::PipelineDecision,
            stages: StagePreferences::all_shown(),
            include_documents: true,
        }
    }
}

fn pipeline_mode(pipeline: &PipelineDef) -> PipelineCallbackMode {
    match pipeline.setting_str("work_callback_mode") {
        Some(s) if s.eq_ignore_ascii_case("forbidden") => PipelineCallbackMode::Forbidden,
        _ => PipelineCallbackMode::Allowed,
    }
}

fn pipeline_stages(pipeline: &PipelineDef) -> StagePreferences {
    let mut stages = StagePreferences::all_shown();
    let Some(raw) = pipeline.settings.get("work_callback_stages").and_then(|v| v.as_object()) else {
        return stages;
    };
    for (key, value) in raw {
        let Some(canonical) = normalize_stage_token(key) else { continue };
        let visible = value.as_str().map(|s| !s.eq_ignore_ascii_case("hide")).unwrap_or(true);
        let visibility = if visible { StageVisibility::Show } else { StageVisibility::Hide };
        match canonical {
            "router" => stages.router = visibility,
            "retrieval" => stages.retrieval = visibility,
            "model_call" => stages.model_call = visibility,
            _ => {}
        }
    }
    stages
}

fn pipeline_include_documents(pipeline: &PipelineDef) -> bool {
    pipeline
        .settings
        .get("work_callback_include_documents")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(true)
}

/// Resolve the effective policy for `pipeline` under the daemon's global
/// config.
#[must_use]
pub fn resolve(global: &GlobalPolicyConfig, pipeline: &PipelineDef) -> CallbackPolicy {
    resolve_callback_policy(
        global.mode,
        pipeline_mode(pipeline),
        global.stages,
        pipeline_stages(pipeline),
        global.include_documents,
        pipeline_include_documents(pipeline),
    )
}
