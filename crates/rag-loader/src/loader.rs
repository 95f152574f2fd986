// SPDX-License-Identifier: MIT OR Apache-2.0
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use rag_core::pipeline::{PipelineDef, StepDef};
use rag_error::{ErrorCode, RagError, Result};
use serde_json::{Map, Value};

/// Loads pipeline YAML files, resolving `extends` by deep-merge.
///
/// `pipelines_root` is the directory bare `extends` names are resolved
/// against, and the boundary non-test pipelines may not resolve outside of.
pub struct Loader {
    pipelines_root: PathBuf,
}

impl Loader {
    /// Create a loader rooted at `pipelines_root`.
    #[must_use]
    pub fn new(pipelines_root: impl Into<PathBuf>) -> Self {
        Self {
            pipelines_root: pipelines_root.into(),
        }
    }

    /// Load a single-pipeline file (a document whose root mapping directly
    /// carries `name`/`extends?`/`settings`/`steps`).
    pub fn load_pipeline_file(&self, path: &Path) -> Result<PipelineDef> {
        let raw = self.resolve_recursive(path, &mut Vec::new())?;
        finalize(raw)
    }

    /// Load a multi-pipeline file (a document with a top-level `pipelines`
    /// list, each entry shaped like a single-pipeline document).
    pub fn load_pipelines_file(&self, path: &Path) -> Result<Vec<PipelineDef>> {
        let content = read_file(path)?;
        let doc = parse_yaml(&content)?;
        let list = doc.get("pipelines").and_then(Value::as_array).ok_or_else(|| {
            RagError::new(
                ErrorCode::InvalidYaml,
                "multi-pipeline document must have a top-level `pipelines` list",
            )
            .with_context("path", path.display().to_string())
        })?;

        let mut defs = Vec::with_capacity(list.len());
        for entry in list {
            let raw = self.resolve_value(entry.clone(), path, &mut Vec::new())?;
            defs.push(finalize(raw)?);
        }
        Ok(defs)
    }

    fn resolve_recursive(&self, path: &Path, chain: &mut Vec<PathBuf>) -> Result<RawPipeline> {
        let content = read_file(path)?;
        let doc = parse_yaml(&content)?;
        self.resolve_value(doc, path, chain)
    }

    fn resolve_value(
        &self,
        doc: Value,
        current_file: &Path,
        chain: &mut Vec<PathBuf>,
    ) -> Result<RawPipeline> {
        let canonical = current_file
            .canonicalize()
            .unwrap_or_else(|_| current_file.to_path_buf());
        if chain.contains(&canonical) {
            let names: Vec<String> = chain
                .iter()
                .map(|p| p.display().to_string())
                .chain(std::iter::once(canonical.display().to_string()))
                .collect();
            return Err(RagError::new(
                ErrorCode::ExtendsCycle,
                format!("extends cycle detected: {}", names.join(" -> ")),
            ));
        }
        chain.push(canonical);

        let child = parse_raw_pipeline(&doc, current_file)?;
        let resolved = if let Some(extends) = &child.extends {
            let current_dir = current_file.parent().unwrap_or_else(|| Path::new("."));
            let test_mode = child.is_test();
            let parent_path = self.resolve_path(extends, current_dir, test_mode)?;
            let parent = self.resolve_recursive(&parent_path, chain)?;
            merge_pipeline(parent, child)
        } else {
            child
        };

        chain.pop();
        Ok(resolved)
    }

    /// Resolve an `extends` reference to a concrete file path.
    fn resolve_path(&self, raw: &str, current_dir: &Path, test_mode: bool) -> Result<PathBuf> {
        let candidate = Path::new(raw);
        if candidate.is_absolute() {
            if !test_mode {
                return Err(RagError::new(
                    ErrorCode::PathEscape,
                    format!("absolute extends path '{raw}' is rejected outside test pipelines"),
                ));
            }
            return Ok(candidate.to_path_buf());
        }

        let is_bare_name = !raw.contains('/') && !raw.contains('\\');
        let resolved = if is_bare_name {
            self.pipelines_root.join(format!("{raw}.yaml"))
        } else {
            current_dir.join(candidate)
        };

        if !test_mode {
            let normalized = normalize_path(&resolved);
            let root_normalized = normalize_path(&self.pipelines_root);
            if !normalized.starts_with(&root_normalized) {
                return Err(RagError::new(
                    ErrorCode::PathEscape,
                    format!(
                        "extends path '{raw}' escapes pipelines_root ({})",
                        self.pipelines_root.display()
                    ),
                ));
            }
        }
        Ok(resolved)
    }
}

/// Lexically normalize a path (resolve `.`/`..` without touching the
/// filesystem, since `extends` targets may not exist yet at validate time).
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        RagError::new(
            ErrorCode::InvalidYaml,
            format!("could not read pipeline file '{}'", path.display()),
        )
        .with_source(e)
    })
}

fn parse_yaml(content: &str) -> Result<Value> {
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(content)
        .map_err(|e| RagError::new(ErrorCode::InvalidYaml, "invalid YAML").with_source(e))?;
    serde_json::to_value(yaml_value).map_err(|e| {
        RagError::new(ErrorCode::InvalidYaml, "YAML document is not representable as JSON")
            .with_source(e)
    })
}

/// An unvalidated, not-yet-merged pipeline document.
struct RawPipeline {
    name: String,
    extends: Option<String>,
    settings: Map<String, Value>,
    steps: Vec<(String, Map<String, Value>)>,
}

impl RawPipeline {
    fn is_test(&self) -> bool {
        self.settings.get("test").and_then(Value::as_bool).unwrap_or(false)
    }
}

fn parse_raw_pipeline(doc: &Value, path: &Path) -> Result<RawPipeline> {
    let obj = doc.as_object().ok_or_else(|| {
        RagError::new(ErrorCode::InvalidYaml, "pipeline document must be a mapping")
            .with_context("path", path.display().to_string())
    })?;

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            RagError::new(ErrorCode::InvalidYaml, "pipeline is missing required field `name`")
                .with_context("path", path.display().to_string())
        })?
        .to_string();

    let extends = obj.get("extends").and_then(Value::as_str).map(str::to_string);

    let settings = match obj.get("settings") {
        None => Map::new(),
        Some(Value::Object(m)) => m.clone(),
        Some(_) => {
            return Err(RagError::new(
                ErrorCode::InvalidYaml,
                "`settings` must be a mapping",
            )
            .with_context("path", path.display().to_string()))
        }
    };

    let steps_value = obj.get("steps").ok_or_else(|| {
        RagError::new(ErrorCode::InvalidYaml, "pipeline is missing required field `steps`")
            .with_context("path", path.display().to_string())
    })?;
    let steps_list = steps_value.as_array().ok_or_else(|| {
        RagError::new(ErrorCode::InvalidYaml, "`steps` must be a list").with_context(
            "path",
            path.display().to_string(),
        )
    })?;

    let mut steps = Vec::with_capacity(steps_list.len());
    for step in steps_list {
        let step_obj = step.as_object().ok_or_else(|| {
            RagError::new(ErrorCode::InvalidYaml, "each step must be a mapping")
        })?;
        let id = step_obj
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RagError::new(ErrorCode::InvalidYaml, "step is missing required field `id`"))?
            .to_string();
        if step_obj.get("action").and_then(Value::as_str).is_none() {
            return Err(RagError::new(
                ErrorCode::InvalidYaml,
                format!("step '{id}' is missing required field `action`"),
            ));
        }
        steps.push((id, step_obj.clone()));
    }

    Ok(RawPipeline {
        name,
        extends,
        settings,
        steps,
    })
}

fn merge_pipeline(parent: RawPipeline, child: RawPipeline) -> RawPipeline {
    let settings = deep_merge_objects(&parent.settings, &child.settings);
    let steps = merge_steps(parent.steps, child.steps);
    RawPipeline {
        name: child.name,
        extends: None,
        settings,
        steps,
    }
}

fn merge_steps(
    parent: Vec<(String, Map<String, Value>)>,
    child: Vec<(String, Map<String, Value>)>,
) -> Vec<(String, Map<String, Value>)> {
    let child_ids: BTreeSet<&String> = child.iter().map(|(id, _)| id).collect();
    let child_by_id: std::collections::HashMap<&String, &Map<String, Value>> =
        child.iter().map(|(id, raw)| (id, raw)).collect();

    let mut merged: Vec<(String, Map<String, Value>)> = parent
        .into_iter()
        .map(|(id, parent_raw)| {
            if let Some(child_raw) = child_by_id.get(&id) {
                (id, deep_merge_objects(&parent_raw, child_raw))
            } else {
                (id, parent_raw)
            }
        })
        .collect();

    let existing_ids: BTreeSet<String> = merged.iter().map(|(id, _)| id.clone()).collect();
    for (id, raw) in child {
        if !existing_ids.contains(&id) && child_ids.contains(&id) {
            merged.push((id, raw));
        }
    }
    merged
}

fn deep_merge_objects(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, overlay_value) in overlay {
        match (merged.get(key), overlay_value) {
            (Some(Value::Object(base_obj)), Value::Object(overlay_obj)) => {
                merged.insert(key.clone(), Value::Object(deep_merge_objects(base_obj, overlay_obj)));
            }
            _ => {
                merged.insert(key.clone(), overlay_value.clone());
            }
        }
    }
    merged
}

fn finalize(raw: RawPipeline) -> Result<PipelineDef> {
    let steps = raw
        .steps
        .into_iter()
        .map(|(id, mut full)| {
            let action = full
                .remove("action")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            full.remove("id");
            StepDef { id, action, raw: full }
        })
        .collect();
    Ok(PipelineDef {
        name: raw.name,
        settings: raw.settings,
        steps,
    })
}
