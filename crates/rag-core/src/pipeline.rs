// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pipeline and step definitions.
//!
//! A [`PipelineDef`] is immutable after load and shared read-only by the
//! engine across a run. It is produced by `rag-loader` and checked by its
//! validator; this module only models the shape, not the loading rules.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named pipeline: an entry step plus an ordered list of steps.
///
/// `settings` must contain `entry_step_id`; `entry_step()` is the
/// convenience accessor used by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDef {
    /// Pipeline name.
    pub name: String,
    /// Free-form settings bag (must contain `entry_step_id`).
    pub settings: Map<String, Value>,
    /// Steps, in declaration order.
    pub steps: Vec<StepDef>,
}

impl PipelineDef {
    /// The configured entry step id, if `settings.entry_step_id` is a string.
    #[must_use]
    pub fn entry_step_id(&self) -> Option<&str> {
        self.settings.get("entry_step_id")?.as_str()
    }

    /// Look up a step by id.
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&StepDef> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Read a setting as a string, falling back to `None` if absent or of
    /// the wrong type.
    #[must_use]
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key)?.as_str()
    }

    /// Read a setting as an `i64`.
    #[must_use]
    pub fn setting_i64(&self, key: &str) -> Option<i64> {
        self.settings.get(key)?.as_i64()
    }

    /// Read a setting as an `f64`.
    #[must_use]
    pub fn setting_f64(&self, key: &str) -> Option<f64> {
        self.settings.get(key)?.as_f64()
    }
}

/// A single step: an id, the action it binds to, and a per-action
/// parameter bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDef {
    /// Unique step id within the owning pipeline.
    pub id: String,
    /// Name of a registered action.
    pub action: String,
    /// Per-action parameter bag, as loaded from YAML.
    pub raw: Map<String, Value>,
}

impl StepDef {
    /// The step's static `next` target, if declared.
    #[must_use]
    pub fn next(&self) -> Option<&str> {
        self.raw.get("next")?.as_str()
    }

    /// The value of an `on_*` routing key (e.g. `on_repeat`, `on_done`).
    #[must_use]
    pub fn on(&self, key: &str) -> Option<&str> {
        self.raw.get(key)?.as_str()
    }

    /// Whether this step ends the run (`end: true`).
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.raw.get("end").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Every step id referenced by this step's `next` and `on_*` fields,
    /// used by the validator to check references.
    #[must_use]
    pub fn referenced_step_ids(&self) -> Vec<&str> {
        self.raw
            .iter()
            .filter(|(k, _)| *k == "next" || k.starts_with("on_"))
            .filter_map(|(_, v)| v.as_str())
            .collect()
    }
}
