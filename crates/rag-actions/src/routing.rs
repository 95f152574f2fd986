// SPDX-License-Identifier: MIT OR Apache-2.0
//! Router and guard actions: `prefix_router`, `json_decision_router`,
//! `repeat_query_guard`, `loop_guard`.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use rag_core::pipeline::StepDef;
use rag_core::state::State;
use rag_engine::{Action, Runtime};
use rag_error::{ErrorCode, RagError, Result};

use crate::jsonish;
use crate::params::{require_str, u32_or};

const DEFAULT_MAX_TURN_LOOPS: u32 = 4;
const DECISION_KEYS: [&str; 3] = ["decision", "route", "mode"];

struct PrefixRoute {
    kind: String,
    prefix: String,
    next: String,
}

fn require_nonempty_str(obj: &Map<String, Value>, key: &str, step_id: &str, route_kind: &str) -> Result<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            RagError::new(
                ErrorCode::InvalidStepParameter,
                format!("step '{step_id}': route '{route_kind}' is missing a non-empty '{key}'"),
            )
        })
}

fn parse_routes(step: &StepDef) -> Result<Vec<PrefixRoute>> {
    let raw_routes = step
        .raw
        .get("routes")
        .and_then(Value::as_object)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            RagError::new(ErrorCode::InvalidStepParameter, format!("step '{}': 'routes' must be a non-empty object", step.id))
        })?;

    raw_routes
        .iter()
        .map(|(kind, def)| {
            let obj = def.as_object().ok_or_else(|| {
                RagError::new(ErrorCode::InvalidStepParameter, format!("step '{}': route '{kind}' must be an object", step.id))
            })?;
            Ok(PrefixRoute {
                kind: kind.clone(),
                prefix: require_nonempty_str(obj, "prefix", &step.id, kind)?,
                next: require_nonempty_str(obj, "next", &step.id, kind)?,
            })
        })
        .collect()
}

/// Matches `state.last_model_response.trim_start()` against `raw.routes`'
/// prefixes (declaration order) and routes to the matched route's `next`,
/// stripping the prefix and writing the remainder back to
/// `last_model_response`. Falls back to `raw.on_other` when nothing matches.
///
/// Idempotent: running it twice on the same response yields the same
/// `last_prefix` and the same routing decision.
pub struct PrefixRouter;

#[async_trait]
impl Action for PrefixRouter {
    fn action_id(&self) -> &str {
        "prefix_router"
    }

    fn log_in(&self, _step: &StepDef, state: &State) -> Value {
        json!({ "last_model_response": state.last_model_response })
    }

    fn log_out(&self, next: &Option<String>, state: &State) -> Value {
        json!({ "matched_prefix": state.last_prefix, "next": next })
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        let routes = parse_routes(step)?;
        let on_other = require_str(step, "on_other")?.to_string();

        let response = state.last_model_response.clone().unwrap_or_default();
        let trimmed = response.trim_start();

        match routes.iter().find(|r| trimmed.starts_with(r.prefix.as_str())) {
            Some(route) => {
                let remainder = trimmed[route.prefix.len()..].to_string();
                state.last_prefix = Some(route.kind.clone());
                state.last_model_response = Some(remainder);
                Ok(Some(route.next.clone()))
            }
            None => {
                state.last_prefix = Some(String::new());
                Ok(Some(on_other))
            }
        }
    }
}

/// Parses `state.last_model_response` with a tolerant JSON-ish parser,
/// reads a decision from `decision | route | mode` (first present wins),
/// removes those keys and writes the compact JSON remainder back to
/// `last_model_response`, then routes via `raw.routes: {decision: next}`,
/// falling back to `raw.on_other`.
pub struct JsonDecisionRouter;

#[async_trait]
impl Action for JsonDecisionRouter {
    fn action_id(&self) -> &str {
        "json_decision_router"
    }

    fn log_in(&self, _step: &StepDef, state: &State) -> Value {
        json!({ "last_model_response": state.last_model_response })
    }

    fn log_out(&self, next: &Option<String>, _state: &State) -> Value {
        json!({ "next": next })
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        let routes = step.raw.get("routes").and_then(Value::as_object).cloned().unwrap_or_default();
        let on_other = require_str(step, "on_other")?.to_string();

        let response = state.last_model_response.as_deref().unwrap_or_default();
        let mut parsed = jsonish::parse_object(response).ok_or_else(|| {
            RagError::new(
                ErrorCode::InvalidStepParameter,
                format!("step '{}': last_model_response is not a JSON object", step.id),
            )
        })?;

        let decision = DECISION_KEYS
            .iter()
            .find_map(|k| parsed.get(*k).and_then(Value::as_str).map(str::to_string));
        for key in DECISION_KEYS {
            parsed.remove(key);
        }
        state.last_model_response = Some(serde_json::to_string(&Value::Object(parsed)).unwrap_or_default());

        let next = decision.as_deref().and_then(|d| routes.get(d)).and_then(Value::as_str).map(str::to_string);
        Ok(Some(next.unwrap_or(on_other)))
    }
}

/// Parses a `{"query": "..."}` payload out of `state.last_model_response`
/// with the tolerant JSON-ish parser, normalizes the extracted query, and
/// routes `on_repeat` when it's empty or already present in
/// `retrieval_queries_asked_norm`, `on_ok` (falling back to `next`)
/// otherwise.
///
/// Deterministic: the same query, repeated, always takes the same branch.
pub struct RepeatQueryGuard;

#[async_trait]
impl Action for RepeatQueryGuard {
    fn action_id(&self) -> &str {
        "repeat_query_guard"
    }

    fn log_in(&self, _step: &StepDef, state: &State) -> Value {
        json!({ "last_model_response": state.last_model_response })
    }

    fn log_out(&self, next: &Option<String>, _state: &State) -> Value {
        json!({ "next": next })
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        let response = state.last_model_response.as_deref().unwrap_or_default();
        let query = jsonish::parse_object(response)
            .and_then(|obj| obj.get("query").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        let norm = State::normalize_query(&query);
        let is_repeat = norm.is_empty() || state.retrieval_queries_asked_norm.contains(&norm);

        if is_repeat {
            Ok(step.on("on_repeat").map(str::to_string).or_else(|| step.next().map(str::to_string)))
        } else {
            Ok(step.on("on_ok").map(str::to_string).or_else(|| step.next().map(str::to_string)))
        }
    }
}

/// Bounds the number of times a given step id may be visited in one run.
/// Routes `on_exceeded` once `settings.max_turn_loops` (default 4) is hit.
pub struct LoopGuard;

#[async_trait]
impl Action for LoopGuard {
    fn action_id(&self) -> &str {
        "loop_guard"
    }

    fn log_in(&self, step: &StepDef, state: &State) -> Value {
        json!({ "visits": state.loop_counters.get(&step.id).copied().unwrap_or(0) })
    }

    fn log_out(&self, next: &Option<String>, _state: &State) -> Value {
        json!({ "next": next })
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        let max_loops = u32_or(step, "max_turn_loops", DEFAULT_MAX_TURN_LOOPS);
        let counter = state.loop_counters.entry(step.id.clone()).or_insert(0);
        *counter += 1;

        if *counter > max_loops {
            Ok(step.on("on_exceeded").map(str::to_string).or_else(|| step.next().map(str::to_string)))
        } else {
            Ok(step.next().map(str::to_string))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_engine::invoke_step;

    fn step_with(action: &str, raw: Map<String, Value>) -> StepDef {
        StepDef { id: "router".into(), action: action.into(), raw }
    }

    #[tokio::test]
    async fn prefix_router_strips_the_matched_prefix_and_routes() {
        let mut raw = Map::new();
        raw.insert(
            "routes".into(),
            json!({
                "search": { "prefix": "SEARCH:", "next": "do_search" },
                "answer": { "prefix": "ANSWER:", "next": "do_answer" },
            }),
        );
        raw.insert("on_other".into(), json!("fallback"));
        let step = step_with("prefix_router", raw);

        let mut state = State::new("q", "s", "c");
        state.last_model_response = Some("  SEARCH: class Foo".into());
        let runtime = Runtime::default();
        let next = invoke_step(&step, &PrefixRouter, &mut state, &runtime).await.unwrap();
        assert_eq!(next.as_deref(), Some("do_search"));
        assert_eq!(state.last_prefix.as_deref(), Some("search"));
        assert_eq!(state.last_model_response.as_deref(), Some(" class Foo"));
    }

    #[tokio::test]
    async fn prefix_router_falls_back_to_on_other_when_unmatched() {
        let mut raw = Map::new();
        raw.insert("routes".into(), json!({ "answer": { "prefix": "ANSWER:", "next": "do_answer" } }));
        raw.insert("on_other".into(), json!("fallback"));
        let step = step_with("prefix_router", raw);

        let mut state = State::new("q", "s", "c");
        state.last_model_response = Some("nonsense".into());
        let runtime = Runtime::default();
        let next = invoke_step(&step, &PrefixRouter, &mut state, &runtime).await.unwrap();
        assert_eq!(next.as_deref(), Some("fallback"));
        assert_eq!(state.last_prefix.as_deref(), Some(""));
        assert_eq!(state.last_model_response.as_deref(), Some("nonsense"));
    }

    #[tokio::test]
    async fn json_decision_router_parses_loosely_formatted_json_and_writes_back_the_remainder() {
        let mut raw = Map::new();
        raw.insert("routes".into(), json!({ "search": "do_search", "answer": "do_answer" }));
        raw.insert("on_other".into(), json!("fallback"));
        let step = step_with("json_decision_router", raw);

        let mut state = State::new("q", "s", "c");
        state.last_model_response = Some("```json\n{decision: 'search', query: 'class Foo',}\n```".into());
        let runtime = Runtime::default();
        let next = invoke_step(&step, &JsonDecisionRouter, &mut state, &runtime).await.unwrap();
        assert_eq!(next.as_deref(), Some("do_search"));
        assert_eq!(state.last_model_response.as_deref(), Some(r#"{"query":"class Foo"}"#));
    }

    #[tokio::test]
    async fn json_decision_router_falls_back_to_on_other_for_unknown_decisions() {
        let mut raw = Map::new();
        raw.insert("routes".into(), json!({ "search": "do_search" }));
        raw.insert("on_other".into(), json!("fallback"));
        let step = step_with("json_decision_router", raw);

        let mut state = State::new("q", "s", "c");
        state.last_model_response = Some(r#"{"mode": "give_up"}"#.into());
        let runtime = Runtime::default();
        let next = invoke_step(&step, &JsonDecisionRouter, &mut state, &runtime).await.unwrap();
        assert_eq!(next.as_deref(), Some("fallback"));
    }

    #[tokio::test]
    async fn repeat_query_guard_detects_repeats_from_the_parsed_payload() {
        let mut raw = Map::new();
        raw.insert("on_repeat".into(), json!("guard_hit"));
        raw.insert("on_ok".into(), json!("search"));
        let step = step_with("repeat_query_guard", raw);

        let mut state = State::new("Class Foo", "s", "c");
        state.record_query_asked("class foo");
        state.last_model_response = Some(r#"{"query": "Class   Foo"}"#.into());
        let runtime = Runtime::default();
        let next = invoke_step(&step, &RepeatQueryGuard, &mut state, &runtime).await.unwrap();
        assert_eq!(next.as_deref(), Some("guard_hit"));
    }

    #[tokio::test]
    async fn repeat_query_guard_allows_a_fresh_query() {
        let mut raw = Map::new();
        raw.insert("on_repeat".into(), json!("guard_hit"));
        raw.insert("on_ok".into(), json!("search"));
        let step = step_with("repeat_query_guard", raw);

        let mut state = State::new("q", "s", "c");
        state.last_model_response = Some(r#"{"query": "class Bar"}"#.into());
        let runtime = Runtime::default();
        let next = invoke_step(&step, &RepeatQueryGuard, &mut state, &runtime).await.unwrap();
        assert_eq!(next.as_deref(), Some("search"));
    }

    #[tokio::test]
    async fn loop_guard_exceeds_after_configured_visits() {
        let mut raw = Map::new();
        raw.insert("max_turn_loops".into(), json!(2));
        raw.insert("on_exceeded".into(), json!("give_up"));
        raw.insert("next".into(), json!("retry"));
        let step = step_with("loop_guard", raw);

        let mut state = State::new("q", "s", "c");
        let runtime = Runtime::default();
        let n1 = invoke_step(&step, &LoopGuard, &mut state, &runtime).await.unwrap();
        assert_eq!(n1.as_deref(), Some("retry"));
        let n2 = invoke_step(&step, &LoopGuard, &mut state, &runtime).await.unwrap();
        assert_eq!(n2.as_deref(), Some("retry"));
        let n3 = invoke_step(&step, &LoopGuard, &mut state, &runtime).await.unwrap();
        assert_eq!(n3.as_deref(), Some("give_up"));
    }
}
