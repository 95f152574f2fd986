// SPDX-License-Identifier: MIT OR Apache-2.0
//! `translate_in_if_needed`: translate the incoming query to neutral
//! (English) text before it reaches retrieval, when it looks like it needs
//! it.
//!
//! There is no translation collaborator wired into this workspace yet — when
//! translation would be needed, the action leaves `user_query` untouched and
//! records the fallback on `State::translate_fallback` rather than silently
//! pretending the text was translated.

use async_trait::async_trait;
use serde_json::{json, Value};

use rag_core::pipeline::StepDef;
use rag_core::state::State;
use rag_engine::{Action, Runtime};
use rag_error::Result;

/// Translates the incoming query into neutral text, falling back to the
/// original text when no translator is configured.
pub struct TranslateInIfNeeded;

impl TranslateInIfNeeded {
    fn looks_non_neutral(query: &str) -> bool {
        !query.is_ascii()
    }
}

#[async_trait]
impl Action for TranslateInIfNeeded {
    fn action_id(&self) -> &str {
        "translate_in_if_needed"
    }

    fn log_in(&self, _step: &StepDef, state: &State) -> Value {
        json!({ "user_query": state.user_query })
    }

    fn log_out(&self, _next: &Option<String>, state: &State) -> Value {
        json!({ "translate_fallback": state.translate_fallback })
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        if Self::looks_non_neutral(&state.user_query) {
            state.translate_fallback = true;
        }
        Ok(step.next().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_core::pipeline::StepDef;
    use rag_engine::invoke_step;
    use serde_json::Map;

    fn step() -> StepDef {
        StepDef {
            id: "translate".into(),
            action: "translate_in_if_needed".into(),
            raw: Map::new(),
        }
    }

    #[tokio::test]
    async fn ascii_query_is_not_marked_as_fallback() {
        let mut state = State::new("where is Foo defined", "s", "c");
        let runtime = Runtime::default();
        invoke_step(&step(), &TranslateInIfNeeded, &mut state, &runtime)
            .await
            .unwrap();
        assert!(!state.translate_fallback);
    }

    #[tokio::test]
    async fn non_ascii_query_marks_fallback() {
        let mut state = State::new("où est Foo défini", "s", "c");
        let runtime = Runtime::default();
        invoke_step(&step(), &TranslateInIfNeeded, &mut state, &runtime)
            .await
            .unwrap();
        assert!(state.translate_fallback);
    }
}
