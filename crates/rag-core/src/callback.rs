// SPDX-License-Identifier: MIT OR Apache-2.0
//! Resolved callback policy and its precedence inputs.
//!
//! These are plain data types; the precedence-resolution algorithm that
//! combines a global mode with a pipeline's declared preference lives in
//! `rag-policy`, which depends on this module rather than the reverse.

use serde::{Deserialize, Serialize};

/// The operator-controlled, global setting for whether work callbacks are
/// streamed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalCallbackMode {
    /// Callbacks are always streamed, regardless of pipeline preference.
    Allowed,
    /// The pipeline's own declared preference decides.
    PipelineDecision,
    /// Callbacks are never streamed, regardless of pipeline preference.
    Forbidden,
}

/// A pipeline's own declared preference for whether it wants callbacks
/// streamed, consulted only when the global mode defers to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineCallbackMode {
    /// This pipeline wants callbacks streamed.
    Allowed,
    /// This pipeline does not want callbacks streamed.
    Forbidden,
}

/// Per-stage visibility: whether a given kind of callback detail is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageVisibility {
    /// This stage's detail is shown.
    Show,
    /// This stage's detail is hidden.
    Hide,
}

/// The fully-resolved policy a run's broker applies when summarizing and
/// emitting events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPolicy {
    /// Whether callbacks are streamed at all.
    pub enabled: bool,
    /// Whether retrieval-stage summaries include document identifiers.
    pub include_documents: bool,
    /// Visibility of the router/classification stage.
    pub router_visibility: StageVisibility,
    /// Visibility of the retrieval stage.
    pub retrieval_visibility: StageVisibility,
    /// Visibility of the model-call stage.
    pub model_call_visibility: StageVisibility,
}

impl CallbackPolicy {
    /// A policy with every stage hidden and callbacks disabled; the safe
    /// default when resolution has not yet run.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            include_documents: false,
            router_visibility: StageVisibility::Hide,
            retrieval_visibility: StageVisibility::Hide,
            model_call_visibility: StageVisibility::Hide,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_policy_hides_everything() {
        let p = CallbackPolicy::disabled();
        assert!(!p.enabled);
        assert!(!p.include_documents);
        assert_eq!(p.router_visibility, StageVisibility::Hide);
    }
}
