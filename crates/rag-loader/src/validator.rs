// SPDX-License-Identifier: MIT OR Apache-2.0
use std::collections::HashSet;

use rag_core::pipeline::PipelineDef;
use rag_error::{ErrorCode, RagError, Result};

/// A non-fatal lint finding surfaced alongside a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LintWarning {
    /// `expand_dependency_tree` appears without a seed-producing predecessor
    /// (a `search_nodes` step) earlier in declaration order.
    ExpandWithoutSeeds {
        /// The offending step id.
        step_id: String,
    },
    /// `fetch_node_texts` appears without a preceding `expand_dependency_tree`.
    FetchWithoutExpand {
        /// The offending step id.
        step_id: String,
    },
    /// A `call_model` step whose id/prompt suggests it produces the answer
    /// appears before any context-fetching step.
    AnswerBeforeContext {
        /// The offending step id.
        step_id: String,
    },
}

/// Validate a loaded [`PipelineDef`] against an action allowlist (or the
/// built-in registry's names when `None`), checking `entry_step_id` and
/// every `next`/`on_*` reference. Returns lint warnings on success.
pub fn validate(pipeline: &PipelineDef, known_actions: Option<&HashSet<String>>) -> Result<Vec<LintWarning>> {
    let step_ids: HashSet<&str> = pipeline.steps.iter().map(|s| s.id.as_str()).collect();

    let entry = pipeline.entry_step_id().ok_or_else(|| {
        RagError::new(
            ErrorCode::MissingEntryStep,
            "settings.entry_step_id is missing",
        )
        .with_context("pipeline", pipeline.name.clone())
    })?;
    if !step_ids.contains(entry) {
        return Err(RagError::new(
            ErrorCode::MissingEntryStep,
            format!("entry_step_id '{entry}' does not name a defined step"),
        )
        .with_context("pipeline", pipeline.name.clone()));
    }

    if let Some(known) = known_actions {
        for step in &pipeline.steps {
            if !known.contains(&step.action) {
                return Err(RagError::new(
                    ErrorCode::UnknownAction,
                    format!("step '{}' uses unknown action '{}'", step.id, step.action),
                )
                .with_context("pipeline", pipeline.name.clone()));
            }
        }
    }

    for step in &pipeline.steps {
        for reference in step.referenced_step_ids() {
            if !step_ids.contains(reference) {
                return Err(RagError::new(
                    ErrorCode::UnknownStepReference,
                    format!(
                        "step '{}' references undefined step '{reference}'",
                        step.id
                    ),
                )
                .with_context("pipeline", pipeline.name.clone()));
            }
        }
    }

    Ok(lint(pipeline))
}

fn lint(pipeline: &PipelineDef) -> Vec<LintWarning> {
    let mut warnings = Vec::new();
    let mut seen_search = false;
    let mut seen_expand = false;
    let mut seen_context_fetch = false;

    for step in &pipeline.steps {
        match step.action.as_str() {
            "search_nodes" => {
                seen_search = true;
                seen_context_fetch = true;
            }
            "expand_dependency_tree" => {
                if !seen_search {
                    warnings.push(LintWarning::ExpandWithoutSeeds {
                        step_id: step.id.clone(),
                    });
                }
                seen_expand = true;
                seen_context_fetch = true;
            }
            "fetch_node_texts" => {
                if !seen_expand {
                    warnings.push(LintWarning::FetchWithoutExpand {
                        step_id: step.id.clone(),
                    });
                }
                seen_context_fetch = true;
            }
            "call_model" => {
                let looks_like_answer =
                    step.id.to_lowercase().contains("answer") || prompt_suggests_answer(step);
                if looks_like_answer && !seen_context_fetch {
                    warnings.push(LintWarning::AnswerBeforeContext {
                        step_id: step.id.clone(),
                    });
                }
            }
            _ => {}
        }
    }
    warnings
}

fn prompt_suggests_answer(step: &rag_core::pipeline::StepDef) -> bool {
    step.raw
        .get("prompt_key")
        .and_then(|v| v.as_str())
        .is_some_and(|p| p.to_lowercase().contains("answer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    fn def(steps: Vec<rag_core::pipeline::StepDef>) -> PipelineDef {
        let mut settings = Map::new();
        settings.insert("entry_step_id".into(), Value::String("start".into()));
        PipelineDef {
            name: "p".into(),
            settings,
            steps,
        }
    }

    fn step(id: &str, action: &str, raw: Map<String, Value>) -> rag_core::pipeline::StepDef {
        rag_core::pipeline::StepDef {
            id: id.into(),
            action: action.into(),
            raw,
        }
    }

    #[test]
    fn missing_entry_step_is_rejected() {
        let mut settings = Map::new();
        settings.insert("entry_step_id".into(), Value::String("nope".into()));
        let pipeline = PipelineDef {
            name: "p".into(),
            settings,
            steps: vec![step("start", "finalize", Map::new())],
        };
        let err = validate(&pipeline, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingEntryStep);
    }

    #[test]
    fn unknown_step_reference_is_rejected() {
        let mut raw = Map::new();
        raw.insert("next".into(), Value::String("missing".into()));
        let pipeline = def(vec![step("start", "finalize", raw)]);
        let err = validate(&pipeline, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownStepReference);
    }

    #[test]
    fn unknown_action_is_rejected_when_allowlist_given() {
        let pipeline = def(vec![step("start", "mystery_action", Map::new())]);
        let mut known = HashSet::new();
        known.insert("finalize".to_string());
        let err = validate(&pipeline, Some(&known)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownAction);
    }

    #[test]
    fn lints_expand_without_seeds() {
        let pipeline = def(vec![step("start", "expand_dependency_tree", Map::new())]);
        let warnings = validate(&pipeline, None).unwrap();
        assert!(warnings
            .iter()
            .any(|w| matches!(w, LintWarning::ExpandWithoutSeeds { .. })));
    }

    #[test]
    fn no_lints_when_search_precedes_expand_and_fetch() {
        let mut raw = Map::new();
        raw.insert("next".into(), Value::String("expand".into()));
        let pipeline = def(vec![
            step("start", "search_nodes", raw),
            step("expand", "expand_dependency_tree", {
                let mut r = Map::new();
                r.insert("next".into(), Value::String("fetch".into()));
                r
            }),
            step("fetch", "fetch_node_texts", Map::new()),
        ]);
        let warnings = validate(&pipeline, None).unwrap();
        assert!(warnings.is_empty());
    }
}
