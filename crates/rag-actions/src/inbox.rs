// SPDX-License-Identifier: MIT OR Apache-2.0
//! `inbox_dispatcher`: read directives out of the model's last response and
//! fan them out as inbox messages to other steps.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use rag_core::pipeline::StepDef;
use rag_core::state::State;
use rag_engine::{Action, Runtime};
use rag_error::Result;

use crate::jsonish;
use crate::params::str_or;

const DEFAULT_DIRECTIVES_KEY: &str = "dispatch";
const DEFAULT_TOPIC: &str = "config";
const DIRECTIVE_RESERVED_KEYS: [&str; 5] = ["target_step_id", "target", "id", "topic", "payload"];

struct DispatchRule {
    topic: Option<String>,
    allow_keys: Vec<String>,
    rename: Map<String, Value>,
}

fn parse_rules(step: &StepDef) -> HashMap<String, DispatchRule> {
    let mut rules = HashMap::new();
    let Some(raw_rules) = step.raw.get("rules").and_then(Value::as_object) else {
        return rules;
    };
    for (target_step_id, def) in raw_rules {
        let Some(obj) = def.as_object() else { continue };
        let topic = obj.get("topic").and_then(Value::as_str).map(str::to_string);
        let allow_keys = obj
            .get("allow_keys")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let rename = obj.get("rename").and_then(Value::as_object).cloned().unwrap_or_default();
        rules.insert(target_step_id.clone(), DispatchRule { topic, allow_keys, rename });
    }
    rules
}

fn directive_target(directive: &Map<String, Value>) -> Option<String> {
    ["target_step_id", "target", "id"]
        .iter()
        .find_map(|k| directive.get(*k).and_then(Value::as_str).map(str::to_string))
}

fn directive_base_payload(directive: &Map<String, Value>) -> Map<String, Value> {
    if let Some(payload) = directive.get("payload").and_then(Value::as_object) {
        return payload.clone();
    }
    directive
        .iter()
        .filter(|(k, _)| !DIRECTIVE_RESERVED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Applies `rule.rename` (original key -> renamed key) first, then filters
/// to `rule.allow_keys` when that list is non-empty.
fn apply_rule(rule: &DispatchRule, base: Map<String, Value>) -> Map<String, Value> {
    let mut renamed = Map::new();
    for (k, v) in base {
        let target_key = rule.rename.get(&k).and_then(Value::as_str).unwrap_or(&k).to_string();
        renamed.insert(target_key, v);
    }
    if rule.allow_keys.is_empty() {
        return renamed;
    }
    renamed.into_iter().filter(|(k, _)| rule.allow_keys.contains(k)).collect()
}

/// Parses `raw.directives_key` (default `"dispatch"`) out of
/// `state.last_model_response` as a tolerant JSON array of directive
/// objects, and enqueues one message per directive whose target step id
/// has a matching entry in `raw.rules`. Directives aimed at an
/// unconfigured target, or whose payload is empty after renaming and
/// `allow_keys` filtering, are dropped.
pub struct InboxDispatcher;

#[async_trait]
impl Action for InboxDispatcher {
    fn action_id(&self) -> &str {
        "inbox_dispatcher"
    }

    fn log_in(&self, _step: &StepDef, state: &State) -> Value {
        json!({ "last_model_response": state.last_model_response })
    }

    fn log_out(&self, next: &Option<String>, state: &State) -> Value {
        json!({ "inbox_len": state.inbox.len(), "next": next })
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        let directives_key = str_or(step, "directives_key", DEFAULT_DIRECTIVES_KEY).to_string();
        let rules = parse_rules(step);

        let response = state.last_model_response.as_deref().unwrap_or_default();
        let directives = jsonish::parse_object(response)
            .and_then(|mut obj| obj.remove(&directives_key))
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();

        for directive in &directives {
            let Some(directive) = directive.as_object() else { continue };
            let Some(target_step_id) = directive_target(directive) else { continue };
            let Some(rule) = rules.get(&target_step_id) else { continue };

            let base = directive_base_payload(directive);
            let payload = apply_rule(rule, base);
            if payload.is_empty() {
                continue;
            }

            let topic = rule
                .topic
                .clone()
                .or_else(|| directive.get("topic").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| DEFAULT_TOPIC.to_string());

            state.enqueue_message(target_step_id, topic, Some(Value::Object(payload)), Some(step.id.clone()))?;
        }

        Ok(step.next().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_engine::invoke_step;
    use serde_json::Map as JsonMap;

    fn step_with(raw: JsonMap<String, Value>) -> StepDef {
        StepDef { id: "dispatcher".into(), action: "inbox_dispatcher".into(), raw }
    }

    #[tokio::test]
    async fn dispatches_and_filters_payload_by_allow_keys() {
        let mut raw = JsonMap::new();
        raw.insert(
            "rules".into(),
            json!({
                "compact_guard": { "topic": "demand", "allow_keys": ["language"] },
            }),
        );
        let step = step_with(raw);

        let mut state = State::new("q", "s", "c");
        state.last_model_response = Some(
            json!({
                "dispatch": [
                    { "target_step_id": "compact_guard", "language": "sql", "priority": "high" },
                ]
            })
            .to_string(),
        );

        let runtime = Runtime::default();
        invoke_step(&step, &InboxDispatcher, &mut state, &runtime).await.unwrap();

        assert_eq!(state.inbox.len(), 1);
        let msg = &state.inbox[0];
        assert_eq!(msg.target_step_id, "compact_guard");
        assert_eq!(msg.topic, "demand");
        assert_eq!(msg.payload, Some(json!({ "language": "sql" })));
        assert_eq!(msg.sender_step_id.as_deref(), Some("dispatcher"));
    }

    #[tokio::test]
    async fn skips_directives_with_no_matching_rule() {
        let mut raw = JsonMap::new();
        raw.insert("rules".into(), json!({ "known_step": { "allow_keys": ["x"] } }));
        let step = step_with(raw);

        let mut state = State::new("q", "s", "c");
        state.last_model_response = Some(
            json!({ "dispatch": [ { "target_step_id": "unknown_step", "x": 1 } ] }).to_string(),
        );

        let runtime = Runtime::default();
        invoke_step(&step, &InboxDispatcher, &mut state, &runtime).await.unwrap();
        assert!(state.inbox.is_empty());
    }

    #[tokio::test]
    async fn renames_keys_before_applying_allow_keys_filter() {
        let mut raw = JsonMap::new();
        raw.insert(
            "rules".into(),
            json!({
                "known_step": { "allow_keys": ["lang"], "rename": { "language": "lang" } },
            }),
        );
        let step = step_with(raw);

        let mut state = State::new("q", "s", "c");
        state.last_model_response = Some(
            json!({ "dispatch": [ { "target_step_id": "known_step", "language": "dotnet" } ] }).to_string(),
        );

        let runtime = Runtime::default();
        invoke_step(&step, &InboxDispatcher, &mut state, &runtime).await.unwrap();

        assert_eq!(state.inbox.len(), 1);
        assert_eq!(state.inbox[0].payload, Some(json!({ "lang": "dotnet" })));
    }

    #[tokio::test]
    async fn honors_a_custom_directives_key() {
        let mut raw = JsonMap::new();
        raw.insert("directives_key".into(), json!("routes_to"));
        raw.insert("rules".into(), json!({ "known_step": { "allow_keys": ["x"] } }));
        let step = step_with(raw);

        let mut state = State::new("q", "s", "c");
        state.last_model_response = Some(
            json!({ "routes_to": [ { "target_step_id": "known_step", "x": 1 } ] }).to_string(),
        );

        let runtime = Runtime::default();
        invoke_step(&step, &InboxDispatcher, &mut state, &runtime).await.unwrap();
        assert_eq!(state.inbox.len(), 1);
    }
}
