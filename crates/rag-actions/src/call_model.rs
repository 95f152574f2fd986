// SPDX-License-Identifier: MIT OR Apache-2.0
//! `call_model`: render a prompt (or chat turns) and ask the configured
//! model client for a response.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use rag_core::model::{ModelClient, ModelRequest};
use rag_core::pipeline::StepDef;
use rag_core::state::State;
use rag_engine::{Action, Runtime};
use rag_error::{ErrorCode, RagError, Result};

use crate::params::{bool_or, opt_str, require_str, u32_or};

const DEFAULT_BANNER: &str = "You are a precise assistant answering questions about a code repository.";
const DEFAULT_PROMPT_DIR: &str = "prompts";

/// Renders and sends a single model request.
pub struct CallModel {
    model: Arc<dyn ModelClient>,
}

impl CallModel {
    /// Build the action against a model client.
    #[must_use]
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }

    fn resolve_template(step: &StepDef) -> Result<String> {
        if let Some(inline) = opt_str(step, "prompt_template") {
            return Ok(inline.to_string());
        }
        let key = require_str(step, "prompt_key")?;
        let dir = std::env::var("RAG_PROMPT_DIR").unwrap_or_else(|_| DEFAULT_PROMPT_DIR.to_string());
        let path = std::path::Path::new(&dir).join(format!("{key}.txt"));
        std::fs::read_to_string(&path).map_err(|e| {
            RagError::new(
                ErrorCode::PromptTemplateReadFailed,
                format!("step '{}': could not read prompt template '{}'", step.id, path.display()),
            )
            .with_source(e)
        })
    }

    fn render(template: &str, banner: &str, context: &str, history: &str, question: &str) -> String {
        let body = template
            .replace("{{context}}", context)
            .replace("{{history}}", history)
            .replace("{{question}}", question);
        format!("[INST]<<SYS>>\n{banner}\n<</SYS>>\n\n{body}[/INST]")
    }
}

#[async_trait]
impl Action for CallModel {
    fn action_id(&self) -> &str {
        "call_model"
    }

    fn log_in(&self, step: &StepDef, state: &State) -> Value {
        json!({
            "prompt_key": step.raw.get("prompt_key"),
            "context_blocks": state.context_blocks.len(),
        })
    }

    fn log_out(&self, _next: &Option<String>, state: &State) -> Value {
        json!({ "response_len": state.last_model_response.as_ref().map(String::len) })
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        let native_chat = bool_or(step, "native_chat", false);
        let banner = opt_str(step, "custom_banner").unwrap_or(DEFAULT_BANNER);
        let max_tokens = if step.raw.contains_key("max_output_tokens") {
            Some(u32_or(step, "max_output_tokens", 0))
        } else {
            None
        };

        let template = Self::resolve_template(step)?;
        let context = state.context_blocks.join("\n\n");
        let history = state.history_blocks.join("\n");

        let request = if native_chat {
            ModelRequest {
                prompt: Self::render(&template, banner, &context, "", &state.user_query),
                history_dialog: Some(state.history_dialog.clone()),
                max_tokens,
            }
        } else {
            ModelRequest {
                prompt: Self::render(&template, banner, &context, &history, &state.user_query),
                history_dialog: None,
                max_tokens,
            }
        };

        let response = self.model.ask(request).await?;
        state.last_model_response = Some(response.clone());
        if bool_or(step, "produces_answer", false) {
            state.answer_neutral = Some(response);
        }

        Ok(step.next().map(str::to_string))
    }
}
