// SPDX-License-Identifier: MIT OR Apache-2.0
//! `set_variables`: a small declarative rule engine for moving text between
//! named `State` slots, with a closed set of transforms.

use async_trait::async_trait;
use serde_json::{json, Value};

use rag_core::pipeline::StepDef;
use rag_core::state::State;
use rag_engine::{Action, Runtime};
use rag_error::{ErrorCode, RagError, Result};

fn get_scalar<'a>(state: &'a State, name: &str) -> Option<&'a str> {
    match name {
        "user_query" => Some(state.user_query.as_str()),
        "last_model_response" => state.last_model_response.as_deref(),
        "retrieval_query" => state.retrieval_query.as_deref(),
        "answer_neutral" => state.answer_neutral.as_deref(),
        "answer_translated" => state.answer_translated.as_deref(),
        "banner_neutral" => state.banner_neutral.as_deref(),
        "banner_translated" => state.banner_translated.as_deref(),
        "final_answer" => state.final_answer.as_deref(),
        _ => None,
    }
}

fn set_scalar(state: &mut State, name: &str, value: Option<String>) -> Result<()> {
    match name {
        "user_query" => state.user_query = value.unwrap_or_default(),
        "last_model_response" => state.last_model_response = value,
        "retrieval_query" => state.retrieval_query = value,
        "answer_neutral" => state.answer_neutral = value,
        "answer_translated" => state.answer_translated = value,
        "banner_neutral" => state.banner_neutral = value,
        "banner_translated" => state.banner_translated = value,
        "final_answer" => state.final_answer = value,
        other => {
            return Err(RagError::new(
                ErrorCode::InvalidStepParameter,
                format!("set_variables: unknown scalar slot '{other}'"),
            ))
        }
    }
    Ok(())
}

fn get_list<'a>(state: &'a State, name: &str) -> Option<&'a [String]> {
    match name {
        "context_blocks" => Some(state.context_blocks.as_slice()),
        "history_blocks" => Some(state.history_blocks.as_slice()),
        "retrieval_queries_asked" => Some(state.retrieval_queries_asked.as_slice()),
        _ => None,
    }
}

fn set_list(state: &mut State, name: &str, value: Vec<String>) -> Result<()> {
    match name {
        "context_blocks" => state.context_blocks = value,
        "history_blocks" => state.history_blocks = value,
        other => {
            return Err(RagError::new(
                ErrorCode::InvalidStepParameter,
                format!("set_variables: unknown list slot '{other}'"),
            ))
        }
    }
    Ok(())
}

fn apply_rule(state: &mut State, rule: &Value) -> Result<()> {
    let op = rule.get("op").and_then(Value::as_str).ok_or_else(|| {
        RagError::new(ErrorCode::InvalidStepParameter, "set_variables: rule is missing 'op'")
    })?;
    let to = rule.get("to").and_then(Value::as_str).ok_or_else(|| {
        RagError::new(ErrorCode::InvalidStepParameter, "set_variables: rule is missing 'to'")
    })?;
    let from = rule.get("from").and_then(Value::as_str);
    let literal = rule.get("value").and_then(Value::as_str);

    match op {
        "copy" => {
            let value = literal
                .map(str::to_string)
                .or_else(|| from.and_then(|f| get_scalar(state, f)).map(str::to_string));
            set_scalar(state, to, value)
        }
        "clear" => set_scalar(state, to, None),
        "split_lines" | "to_list" => {
            let source = from.ok_or_else(|| {
                RagError::new(ErrorCode::InvalidStepParameter, format!("set_variables: '{op}' requires 'from'"))
            })?;
            let text = get_scalar(state, source).unwrap_or("").to_string();
            let delimiter = if op == "split_lines" { "\n" } else { "," };
            let items: Vec<String> = text
                .split(delimiter)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            set_list(state, to, items)
        }
        "parse_json" => {
            let source = from.ok_or_else(|| {
                RagError::new(ErrorCode::InvalidStepParameter, "set_variables: 'parse_json' requires 'from'")
            })?;
            let text = get_scalar(state, source).unwrap_or("");
            let parsed: Vec<String> = serde_json::from_str::<Vec<String>>(text).map_err(|e| {
                RagError::new(ErrorCode::InvalidStepParameter, "set_variables: 'parse_json' source is not a JSON string array")
                    .with_source(e)
            })?;
            set_list(state, to, parsed)
        }
        "to_context_blocks" => {
            let source = from.ok_or_else(|| {
                RagError::new(ErrorCode::InvalidStepParameter, "set_variables: 'to_context_blocks' requires 'from'")
            })?;
            let items = get_list(state, source).map(<[String]>::to_vec).unwrap_or_default();
            set_list(state, "context_blocks", items)
        }
        other => Err(RagError::new(
            ErrorCode::InvalidStepParameter,
            format!("set_variables: unknown transform '{other}'"),
        )),
    }
}

/// Applies a declarative list of variable-assignment rules.
pub struct SetVariables;

#[async_trait]
impl Action for SetVariables {
    fn action_id(&self) -> &str {
        "set_variables"
    }

    fn log_in(&self, step: &StepDef, _state: &State) -> Value {
        json!({ "rules": step.raw.get("rules").cloned().unwrap_or(Value::Null) })
    }

    fn log_out(&self, _next: &Option<String>, _state: &State) -> Value {
        Value::Null
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        let rules = step.raw.get("rules").and_then(Value::as_array).cloned().unwrap_or_default();
        for rule in &rules {
            apply_rule(state, rule)?;
        }
        Ok(step.next().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_engine::invoke_step;
    use serde_json::Map;

    fn step_with_rules(rules: Value) -> StepDef {
        let mut raw = Map::new();
        raw.insert("rules".into(), rules);
        StepDef { id: "vars".into(), action: "set_variables".into(), raw }
    }

    #[tokio::test]
    async fn copy_moves_scalar_between_slots() {
        let step = step_with_rules(json!([{"op": "copy", "from": "last_model_response", "to": "answer_neutral"}]));
        let mut state = State::new("q", "s", "c");
        state.last_model_response = Some("the answer".into());
        let runtime = Runtime::default();
        invoke_step(&step, &SetVariables, &mut state, &runtime).await.unwrap();
        assert_eq!(state.answer_neutral.as_deref(), Some("the answer"));
    }

    #[tokio::test]
    async fn split_lines_populates_a_list_slot() {
        let step = step_with_rules(json!([{"op": "split_lines", "from": "last_model_response", "to": "context_blocks"}]));
        let mut state = State::new("q", "s", "c");
        state.last_model_response = Some("a\nb\n\nc".into());
        let runtime = Runtime::default();
        invoke_step(&step, &SetVariables, &mut state, &runtime).await.unwrap();
        assert_eq!(state.context_blocks, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn clear_empties_a_scalar_slot() {
        let step = step_with_rules(json!([{"op": "clear", "to": "answer_neutral"}]));
        let mut state = State::new("q", "s", "c");
        state.answer_neutral = Some("stale".into());
        let runtime = Runtime::default();
        invoke_step(&step, &SetVariables, &mut state, &runtime).await.unwrap();
        assert!(state.answer_neutral.is_none());
    }
}
