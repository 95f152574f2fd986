// SPDX-License-Identifier: MIT OR Apache-2.0
//! `load_conversation_history`: render the session's recent finalized turns
//! onto `State` for prompting, and start (or resume) this turn's history
//! record.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use rag_core::conversation::ConversationHistoryService;
use rag_core::pipeline::StepDef;
use rag_core::state::{DialogTurn, State};
use rag_engine::{Action, Runtime};
use rag_error::Result;

use crate::params::u32_or;

const DEFAULT_MAX_TURNS: u32 = 6;

/// Populates `state.history_dialog`/`history_blocks` and calls
/// `on_request_started` so `finalize` has a `turn_id` to write back to.
pub struct LoadConversationHistory {
    history: Arc<dyn ConversationHistoryService>,
}

impl LoadConversationHistory {
    /// Build the action against a history service.
    #[must_use]
    pub fn new(history: Arc<dyn ConversationHistoryService>) -> Self {
        Self { history }
    }
}

#[async_trait]
impl Action for LoadConversationHistory {
    fn action_id(&self) -> &str {
        "load_conversation_history"
    }

    fn log_in(&self, _step: &StepDef, state: &State) -> Value {
        json!({ "session_id": state.session_id })
    }

    fn log_out(&self, _next: &Option<String>, state: &State) -> Value {
        json!({ "history_turns": state.history_dialog.len() / 2 })
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        let max_turns = u32_or(step, "max_turns", DEFAULT_MAX_TURNS);

        if let Some(request_id) = state.request_id.clone() {
            let turn_id = self
                .history
                .on_request_started(
                    &state.session_id,
                    &request_id,
                    state.user_id.as_deref(),
                    &state.user_query,
                )
                .await?;
            state.turn_id = Some(turn_id);
        }

        let pairs = self
            .history
            .get_recent_qa_neutral(&state.session_id, max_turns)
            .await?;

        state.history_dialog.clear();
        state.history_blocks.clear();
        for pair in pairs {
            state.history_dialog.push(DialogTurn {
                role: "user".into(),
                content: pair.question_neutral.clone(),
            });
            state.history_dialog.push(DialogTurn {
                role: "assistant".into(),
                content: pair.answer_neutral.clone(),
            });
            state
                .history_blocks
                .push(format!("Q: {}\nA: {}", pair.question_neutral, pair.answer_neutral));
        }

        Ok(step.next().map(str::to_string))
    }
}
