// SPDX-License-Identifier: MIT OR Apache-2.0
//! The step-dispatch execution engine.
//!
//! [`Engine::run`] walks a [`PipelineDef`] from its entry step, invoking a
//! registered [`Action`] per step through the tracing wrapper in
//! [`invoke_step`], consuming the inbox on every step entry, and stopping
//! at the first step marked `end: true`.

mod action;
mod registry;
mod runtime;

pub use action::{invoke_step, Action};
pub use registry::ActionRegistry;
pub use runtime::Runtime;

use rag_core::pipeline::PipelineDef;
use rag_core::state::State;
use rag_core::trace::Event;
use rag_error::{ErrorCode, RagError, Result};

/// Runs pipelines against a fixed [`ActionRegistry`].
pub struct Engine {
    registry: ActionRegistry,
}

impl Engine {
    /// Build an engine dispatching through `registry`.
    #[must_use]
    pub fn new(registry: ActionRegistry) -> Self {
        Self { registry }
    }

    /// Execute `pipeline` starting at its entry step, mutating `state` in
    /// place. Returns once a step with `end: true` has run.
    pub async fn run(
        &self,
        pipeline: &PipelineDef,
        state: &mut State,
        runtime: &Runtime,
    ) -> Result<()> {
        let mut step_id = pipeline
            .entry_step_id()
            .ok_or_else(|| RagError::new(ErrorCode::MissingEntryStep, "settings.entry_step_id is missing"))?
            .to_string();

        loop {
            state.steps_used.push(step_id.clone());

            let step = pipeline.step(&step_id).ok_or_else(|| {
                RagError::new(ErrorCode::UnknownStepReference, format!("missing step '{step_id}'"))
            })?;

            let action = self.registry.get(&step.action).ok_or_else(|| {
                RagError::new(ErrorCode::UnknownAction, format!("unknown action '{}'", step.action))
            })?;

            state.consume_for_step(&step_id, runtime.trace_enabled);

            let next_override = invoke_step(step, action.as_ref(), state, runtime).await?;
            let resolved_next = next_override.or_else(|| step.next().map(str::to_string));

            if step.is_end() {
                let remaining = state.inbox.len();
                state.pipeline_trace_events.push(Event::RunEnd {
                    step_id: step_id.clone(),
                    remaining_inbox: remaining,
                });
                if runtime.inbox_fail_fast && remaining > 0 {
                    return Err(RagError::new(
                        ErrorCode::InboxNotEmpty,
                        format!("inbox has {remaining} unconsumed message(s) at run end"),
                    )
                    .with_context("step_id", step_id));
                }
                return Ok(());
            }

            step_id = resolved_next.ok_or_else(|| {
                RagError::new(
                    ErrorCode::UnknownStepReference,
                    format!("step '{step_id}' has no `next` and is not marked `end`"),
                )
            })?;
        }
    }
}
