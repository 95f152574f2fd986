// SPDX-License-Identifier: MIT OR Apache-2.0
//! `parallel_roads`/`fork_action`/`merge_action`: a small state machine for
//! running the same sub-pipeline once per snapshot ("road") and merging the
//! results, using `state.graph_debug` as the bookkeeping slot since the
//! engine dispatches one step at a time on a single `State`.

use async_trait::async_trait;
use serde_json::{json, Value};

use rag_core::pipeline::StepDef;
use rag_core::state::State;
use rag_engine::{Action, Runtime};
use rag_error::{ErrorCode, RagError, Result};

use crate::params::require_str;

const ROADS_KEY: &str = "fanout_roads";
const INDEX_KEY: &str = "fanout_index";
const RESULTS_KEY: &str = "fanout_results";

fn roads(state: &State) -> Vec<String> {
    state
        .graph_debug
        .get(ROADS_KEY)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn current_index(state: &State) -> usize {
    state.graph_debug.get(INDEX_KEY).and_then(Value::as_u64).unwrap_or(0) as usize
}

/// Declares the snapshots to fan out across and enters the first road.
pub struct ParallelRoads;

#[async_trait]
impl Action for ParallelRoads {
    fn action_id(&self) -> &str {
        "parallel_roads"
    }

    fn log_in(&self, step: &StepDef, _state: &State) -> Value {
        json!({ "snapshot_ids": step.raw.get("snapshot_ids") })
    }

    fn log_out(&self, _next: &Option<String>, state: &State) -> Value {
        json!({ "roads": roads(state).len() })
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        let snapshot_ids: Vec<String> = step
            .raw
            .get("snapshot_ids")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        if snapshot_ids.is_empty() {
            return Err(RagError::new(
                ErrorCode::InvalidStepParameter,
                format!("step '{}': parallel_roads requires a non-empty 'snapshot_ids'", step.id),
            ));
        }

        state
            .graph_debug
            .insert(ROADS_KEY.to_string(), json!(snapshot_ids));
        state.graph_debug.insert(INDEX_KEY.to_string(), json!(0));
        state.graph_debug.insert(RESULTS_KEY.to_string(), json!([]));
        state.snapshot_id = snapshot_ids.first().cloned();
        state.snapshot_id_b = snapshot_ids.get(1).cloned();
        state.context_blocks.clear();
        state.node_texts.clear();

        Ok(step.next().map(str::to_string))
    }
}

/// Closes out the current road, records its result, and either advances to
/// the next road or signals completion.
pub struct ForkAction;

#[async_trait]
impl Action for ForkAction {
    fn action_id(&self) -> &str {
        "fork_action"
    }

    fn log_in(&self, _step: &StepDef, state: &State) -> Value {
        json!({ "index": current_index(state), "roads": roads(state).len() })
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
        let road_list = roads(state);
        let index = current_index(state);

        let mut results: Vec<Value> = state
            .graph_debug
            .get(RESULTS_KEY)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        results.push(json!({
            "snapshot_id": road_list.get(index),
            "context_blocks": state.context_blocks,
        }));
        state.graph_debug.insert(RESULTS_KEY.to_string(), json!(results));

        let next_index = index + 1;
        if next_index < road_list.len() {
            state.graph_debug.insert(INDEX_KEY.to_string(), json!(next_index));
            state.snapshot_id = road_list.get(next_index).cloned();
            state.context_blocks.clear();
            state.node_texts.clear();
            Ok(step.on("on_next_road").map(str::to_string).or_else(|| step.next().map(str::to_string)))
        } else {
            Ok(step.on("on_done").map(str::to_string).or_else(|| step.next().map(str::to_string)))
        }
    }
}

/// Merges every road's committed context blocks back into one sequence,
/// in road declaration order.
pub struct MergeAction;

#[async_trait]
impl Action for MergeAction {
    fn action_id(&self) -> &str {
        "merge_action"
    }

    fn log_in(&self, _step: &StepDef, state: &State) -> Value {
        json!({ "results": state.graph_debug.get(RESULTS_KEY) })
    }

    fn log_out(&self, _next: &Option<String>, state: &State) -> Value {
        json!({ "merged_blocks": state.context_blocks.len() })
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        let label_key = require_str(step, "label_key").ok();

        let results: Vec<Value> = state
            .graph_debug
            .get(RESULTS_KEY)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut merged = Vec::new();
        for result in &results {
            if let Some(label_key) = label_key {
                if let Some(snapshot_id) = result.get("snapshot_id").and_then(Value::as_str) {
                    merged.push(format!("[{label_key}: {snapshot_id}]"));
                }
            }
            if let Some(blocks) = result.get("context_blocks").and_then(Value::as_array) {
                for block in blocks {
                    if let Some(s) = block.as_str() {
                        merged.push(s.to_string());
                    }
                }
            }
        }

        state.context_blocks = merged;
        state.graph_debug.remove(ROADS_KEY);
        state.graph_debug.remove(INDEX_KEY);
        state.graph_debug.remove(RESULTS_KEY);

        Ok(step.next().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_engine::invoke_step;
    use serde_json::Map as JsonMap;

    fn step(id: &str, action: &str, raw: JsonMap<String, Value>) -> StepDef {
        StepDef { id: id.into(), action: action.into(), raw }
    }

    #[tokio::test]
    async fn parallel_roads_fork_and_merge_round_trip() {
        let mut init_raw = JsonMap::new();
        init_raw.insert("snapshot_ids".into(), json!(["snap-a", "snap-b"]));
        init_raw.insert("next".into(), json!("fork"));
        let init = step("init", "parallel_roads", init_raw);

        let mut fork_raw = JsonMap::new();
        fork_raw.insert("on_next_road".into(), json!("init"));
        fork_raw.insert("on_done".into(), json!("merge"));
        let fork = step("fork", "fork_action", fork_raw);

        let mut merge_raw = JsonMap::new();
        merge_raw.insert("next".into(), json!("answer"));
        let merge = step("merge", "merge_action", merge_raw);

        let mut state = State::new("q", "s", "c");
        let runtime = Runtime::default();

        let next = invoke_step(&init, &ParallelRoads, &mut state, &runtime).await.unwrap();
        assert_eq!(next.as_deref(), Some("fork"));
        assert_eq!(state.snapshot_id.as_deref(), Some("snap-a"));
        state.context_blocks.push("from road a".into());

        let next = invoke_step(&fork, &ForkAction, &mut state, &runtime).await.unwrap();
        assert_eq!(next.as_deref(), Some("init"));
        assert_eq!(state.snapshot_id.as_deref(), Some("snap-b"));
        state.context_blocks.push("from road b".into());

        let next = invoke_step(&fork, &ForkAction, &mut state, &runtime).await.unwrap();
        assert_eq!(next.as_deref(), Some("merge"));

        let next = invoke_step(&merge, &MergeAction, &mut state, &runtime).await.unwrap();
        assert_eq!(next.as_deref(), Some("answer"));
        assert_eq!(state.context_blocks, vec!["from road a", "from road b"]);
    }
}
