// SPDX-License-Identifier: MIT OR Apache-2.0
//! The model-client contract `call_model` dispatches through.

use async_trait::async_trait;

use crate::state::DialogTurn;
use rag_error::Result;

/// A request to the language model.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// The fully rendered prompt (used unless `history_dialog` is set).
    pub prompt: String,
    /// When set, the model is called in chat-history mode instead of
    /// single-prompt mode.
    pub history_dialog: Option<Vec<DialogTurn>>,
    /// Output token cap, if the step overrides the default.
    pub max_tokens: Option<u32>,
}

/// A collaborator able to answer a [`ModelRequest`] with raw text.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Produce the model's raw response text.
    async fn ask(&self, request: ModelRequest) -> Result<String>;
}
