// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared command implementations for the RAG CLI.
//!
//! These functions are library-level so they can be tested without
//! spawning the binary.

use std::path::Path;

use anyhow::{Context, Result};
use rag_core::pipeline::PipelineDef;
use rag_core::state::State as PipelineState;
use rag_core::trace::Event;
use rag_engine::{ActionRegistry, Engine, Runtime as EngineRuntime};
use rag_loader::{validate, LintWarning, Loader};

/// What `validate` found for a single pipeline file.
pub struct ValidationReport {
    pub pipeline_name: String,
    pub warnings: Vec<LintWarning>,
}

/// Load and validate a pipeline file against the given action registry.
pub fn validate_pipeline_file(path: &Path, registry: &ActionRegistry) -> Result<ValidationReport> {
    let loader = Loader::new(path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf());
    let pipeline = loader
        .load_pipeline_file(path)
        .with_context(|| format!("load pipeline from '{}'", path.display()))?;

    let known = registry.known_action_names();
    let warnings = validate(&pipeline, Some(&known))
        .with_context(|| format!("validate pipeline from '{}'", path.display()))?;

    Ok(ValidationReport { pipeline_name: pipeline.name, warnings })
}

/// Load a pipeline file without validating it against a known-action set.
pub fn load_pipeline_file(path: &Path) -> Result<PipelineDef> {
    let loader = Loader::new(path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf());
    loader.load_pipeline_file(path).with_context(|| format!("load pipeline from '{}'", path.display()))
}

/// The outcome of a local pipeline run.
pub struct RunOutcome {
    pub final_answer: Option<String>,
    pub trace: Vec<Event>,
}

/// Run a loaded pipeline to completion against the given engine.
pub async fn run_pipeline(
    engine: &Engine,
    pipeline: &PipelineDef,
    user_query: String,
    session_id: String,
    consultant: String,
    runtime: &EngineRuntime,
) -> Result<RunOutcome> {
    let mut state = PipelineState::new(user_query, session_id, consultant);
    engine.run(pipeline, &mut state, runtime).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(RunOutcome { final_answer: state.final_answer, trace: state.pipeline_trace_events })
}

/// Hand-built JSON schema for [`PipelineDef`]'s on-disk YAML shape.
///
/// `settings`/`raw` are free-form JSON bags, so a derived schema would add
/// noise without adding precision; this mirrors what the daemon's
/// `/schema/pipeline` endpoint returns.
pub fn pipeline_schema() -> serde_json::Value {
    serde_json::json!({
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
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_actions::demo::demo_collaborators;
    use rag_actions::register_all;

    const VALID_PIPELINE: &str = r#"
name: demo
settings:
  entry_step_id: start
steps:
  - id: start
    action: finalize
    end: true
"#;

    const UNKNOWN_ACTION_PIPELINE: &str = r#"
name: demo
settings:
  entry_step_id: start
steps:
  - id: start
    action: not_a_real_action
    end: true
"#;

    #[test]
    fn validate_accepts_a_well_formed_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.yaml");
        std::fs::write(&path, VALID_PIPELINE).unwrap();

        let registry = register_all(demo_collaborators());
        let report = validate_pipeline_file(&path, &registry).unwrap();
        assert_eq!(report.pipeline_name, "demo");
    }

    #[test]
    fn validate_rejects_unknown_action() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.yaml");
        std::fs::write(&path, UNKNOWN_ACTION_PIPELINE).unwrap();

        let registry = register_all(demo_collaborators());
        assert!(validate_pipeline_file(&path, &registry).is_err());
    }

    #[test]
    fn pipeline_schema_is_an_object_schema() {
        let schema = pipeline_schema();
        assert_eq!(schema["type"], "object");
    }

    #[tokio::test]
    async fn run_pipeline_reaches_the_end_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.yaml");
        std::fs::write(&path, VALID_PIPELINE).unwrap();

        let pipeline = load_pipeline_file(&path).unwrap();
        let registry = register_all(demo_collaborators());
        let engine = Engine::new(registry);
        let runtime = EngineRuntime::default();

        let outcome =
            run_pipeline(&engine, &pipeline, "hello".into(), "s1".into(), "tests".into(), &runtime).await.unwrap();
        assert!(!outcome.trace.is_empty());
    }
}
