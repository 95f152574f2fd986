// SPDX-License-Identifier: MIT OR Apache-2.0
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use rag_core::pipeline::StepDef;
use rag_core::state::State;
use rag_core::trace::{Event, StepTraceEvent};
use rag_error::Result;

use crate::runtime::Runtime;

/// A registered pipeline action.
///
/// Implementations own their own collaborators (retrieval backend, graph
/// provider, model client, …) via construction; [`Runtime`] carries only
/// engine-wide flags, never collaborator handles.
#[async_trait]
pub trait Action: Send + Sync {
    /// Stable identifier recorded on trace events, independent of the
    /// registry name a pipeline binds this action to.
    fn action_id(&self) -> &str;

    /// Best-effort JSON snapshot of the inputs this invocation will read.
    fn log_in(&self, _step: &StepDef, _state: &State) -> Value {
        Value::Null
    }

    /// Best-effort JSON snapshot of this invocation's result.
    fn log_out(&self, _next: &Option<String>, _state: &State) -> Value {
        Value::Null
    }

    /// Run the action, returning a next-step-id override or `None` to defer
    /// to the step's static `next`.
    async fn do_execute(&self, step: &StepDef, state: &mut State, runtime: &Runtime) -> Result<Option<String>>;
}

/// Invoke `action` for `step`, wrapping the call with the base-action trace
/// contract: capture `log_in`, run `do_execute` (catching only to record
/// the error before re-raising it), compute `next_resolved`, and append a
/// [`Event::Step`] when `runtime.trace_enabled`.
pub async fn invoke_step(
    step: &StepDef,
    action: &(dyn Action + '_),
    state: &mut State,
    runtime: &Runtime,
) -> Result<Option<String>> {
    let input = best_effort_json(action.log_in(step, state));
    let ts_utc = Utc::now();

    let outcome = action.do_execute(step, state, runtime).await;

    let (next, error) = match &outcome {
        Ok(next) => (next.clone(), None),
        Err(e) => (None, Some(e.to_string())),
    };

    if runtime.trace_enabled {
        let output = best_effort_json(action.log_out(&next, state));
        let next_default = step.next().map(str::to_string);
        let next_resolved = next.clone().or_else(|| next_default.clone());
        state.pipeline_trace_events.push(Event::Step(StepTraceEvent {
            ts_utc,
            step_id: step.id.clone(),
            action: step.action.clone(),
            next_default,
            next_resolved,
            action_class: step.action.clone(),
            action_id: action.action_id().to_string(),
            input,
            output,
            error,
            state_after: state.shallow_snapshot(),
        }));
    }

    outcome
}

/// Normalize a `log_in`/`log_out` payload to an object, wrapping bare
/// scalars so every trace event's `in`/`out` field is consistently shaped.
fn best_effort_json(value: Value) -> Value {
    match value {
        Value::Null => Value::Object(serde_json::Map::new()),
        Value::Object(_) => value,
        other => {
            let mut m = serde_json::Map::new();
            m.insert("value".to_string(), other);
            Value::Object(m)
        }
    }
}
