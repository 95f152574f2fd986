// SPDX-License-Identifier: MIT OR Apache-2.0
//! `finalize`: materialize the user-visible answer and persist the turn.
//! A history-write failure here is logged and swallowed, never fatal — the
//! caller already has their answer.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use rag_core::conversation::{ConversationHistoryService, FinalizeTurnRequest};
use rag_core::pipeline::StepDef;
use rag_core::state::State;
use rag_engine::{Action, Runtime};
use rag_error::Result;

/// Materializes `state.final_answer` and writes the turn back to history.
pub struct Finalize {
    history: Arc<dyn ConversationHistoryService>,
}

impl Finalize {
    /// Build the action against a history service.
    #[must_use]
    pub fn new(history: Arc<dyn ConversationHistoryService>) -> Self {
        Self { history }
    }
}

#[async_trait]
impl Action for Finalize {
    fn action_id(&self) -> &str {
        "finalize"
    }

    fn log_in(&self, _step: &StepDef, state: &State) -> Value {
        json!({ "answer_neutral": state.answer_neutral, "translate_chat": state.translate_chat })
    }

    fn log_out(&self, _next: &Option<String>, state: &State) -> Value {
        json!({ "final_answer": state.final_answer })
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        let answer_neutral = state.answer_neutral.clone().unwrap_or_default();
        state.final_answer = Some(
            if state.translate_chat {
                state.answer_translated.clone().unwrap_or_else(|| answer_neutral.clone())
            } else {
                answer_neutral.clone()
            },
        );

        if let (Some(turn_id), Some(request_id)) = (state.turn_id, state.request_id.clone()) {
            let request = FinalizeTurnRequest {
                session_id: state.session_id.clone(),
                request_id,
                identity_id: state.user_id.clone(),
                turn_id,
                answer_neutral,
                answer_translated: state.answer_translated.clone(),
                translate_chat: state.translate_chat,
            };
            if let Err(e) = self.history.on_request_finalized(request).await {
                warn!(error = %e, session_id = %state.session_id, "failed to persist finalized turn");
            }
        }

        Ok(step.next().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rag_core::conversation::QaPair;
    use rag_engine::invoke_step;
    use serde_json::Map;
    use uuid::Uuid;

    struct FakeHistory;

    #[async_trait]
    impl ConversationHistoryService for FakeHistory {
        async fn on_request_started(
            &self,
            _session_id: &str,
            _request_id: &str,
            _identity_id: Option<&str>,
            _user_query: &str,
        ) -> Result<Uuid> {
            Ok(Uuid::nil())
        }

        async fn on_request_finalized(&self, _request: FinalizeTurnRequest) -> Result<()> {
            Ok(())
        }

        async fn get_recent_qa_neutral(&self, _session_id: &str, _limit: u32) -> Result<Vec<QaPair>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn finalize_prefers_translated_answer_when_translate_chat_is_set() {
        let step = StepDef { id: "finalize".into(), action: "finalize".into(), raw: Map::new() };
        let mut state = State::new("q", "s", "c");
        state.translate_chat = true;
        state.answer_neutral = Some("neutral".into());
        state.answer_translated = Some("translated".into());
        state.turn_id = Some(Uuid::nil());
        state.request_id = Some("r1".into());

        let action = Finalize::new(Arc::new(FakeHistory));
        let runtime = Runtime::default();
        invoke_step(&step, &action, &mut state, &runtime).await.unwrap();
        assert_eq!(state.final_answer.as_deref(), Some("translated"));
    }

    #[tokio::test]
    async fn finalize_falls_back_to_neutral_without_translation() {
        let step = StepDef { id: "finalize".into(), action: "finalize".into(), raw: Map::new() };
        let mut state = State::new("q", "s", "c");
        state.answer_neutral = Some("neutral".into());

        let action = Finalize::new(Arc::new(FakeHistory));
        let runtime = Runtime::default();
        invoke_step(&step, &action, &mut state, &runtime).await.unwrap();
        assert_eq!(state.final_answer.as_deref(), Some("neutral"));
    }
}
