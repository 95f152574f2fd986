// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stored conversation turns.
//!
//! A [`ConversationTurn`] is the unit the history service reads and writes;
//! `rag-history` owns persistence, this module only the shape. Turn
//! identity is `(session_id, request_id)`, not `turn_id` — re-submitting the
//! same `request_id` updates the existing turn rather than creating a new
//! one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rag_error::Result;

/// One exchange in a session's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Durable identity of the turn.
    pub turn_id: Uuid,
    /// Owning session.
    pub session_id: String,
    /// Caller-supplied idempotency key for this turn.
    pub request_id: String,
    /// Authenticated identity that owns this session, if any.
    pub user_id: Option<String>,
    /// The user's query text.
    pub user_query: String,
    /// The assistant's neutral-language answer, if the turn has been
    /// finalized.
    pub answer_neutral: Option<String>,
    /// The assistant's UI-language answer, if translation ran. May be a
    /// fallback copy of `answer_neutral` — see `answer_translated_is_fallback`.
    pub answer_translated: Option<String>,
    /// Set when `answer_translated` is a fallback copy of `answer_neutral`
    /// rather than a real translation.
    pub answer_translated_is_fallback: bool,
    /// When the turn was first created.
    pub created_at_utc: DateTime<Utc>,
    /// When the turn was last updated (e.g. on finalize).
    pub updated_at_utc: DateTime<Utc>,
    /// When the turn was finalized, if it has been.
    pub finalized_at_utc: Option<DateTime<Utc>>,
}

impl ConversationTurn {
    /// Start a new, unanswered turn.
    #[must_use]
    pub fn new_pending(
        session_id: impl Into<String>,
        request_id: impl Into<String>,
        user_id: Option<String>,
        user_query: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            session_id: session_id.into(),
            request_id: request_id.into(),
            user_id,
            user_query: user_query.into(),
            answer_neutral: None,
            answer_translated: None,
            answer_translated_is_fallback: false,
            created_at_utc: now,
            updated_at_utc: now,
            finalized_at_utc: None,
        }
    }

    /// Whether this turn has a recorded answer.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.answer_neutral.is_some()
    }

    /// Record the final answer(s) and bump `updated_at_utc`/`finalized_at_utc`.
    ///
    /// When `translate_chat` is set but no translated answer was produced,
    /// `answer_translated` falls back to a copy of `answer_neutral` and
    /// `answer_translated_is_fallback` is set.
    pub fn finalize(
        &mut self,
        answer_neutral: impl Into<String>,
        answer_translated: Option<String>,
        translate_chat: bool,
        now: DateTime<Utc>,
    ) {
        let answer_neutral = answer_neutral.into();
        let (translated, is_fallback) = match (translate_chat, answer_translated) {
            (true, Some(t)) => (Some(t), false),
            (true, None) => (Some(answer_neutral.clone()), true),
            (false, translated) => (translated, false),
        };
        self.answer_neutral = Some(answer_neutral);
        self.answer_translated = translated;
        self.answer_translated_is_fallback = is_fallback;
        self.updated_at_utc = now;
        self.finalized_at_utc = Some(now);
    }
}

/// A neutral-language question/answer pair from a finalized turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaPair {
    /// The question as asked, in neutral language.
    pub question_neutral: String,
    /// The stored neutral answer.
    pub answer_neutral: String,
}

/// Arguments to [`ConversationHistoryService::on_request_finalized`].
#[derive(Debug, Clone)]
pub struct FinalizeTurnRequest {
    /// Owning session.
    pub session_id: String,
    /// Idempotency key for the turn.
    pub request_id: String,
    /// Authenticated identity, if any.
    pub identity_id: Option<String>,
    /// Durable turn id assigned by `on_request_started`.
    pub turn_id: Uuid,
    /// Neutral-language answer.
    pub answer_neutral: String,
    /// UI-language answer, or `None` when translation produced nothing.
    pub answer_translated: Option<String>,
    /// Whether the turn requested UI-language output; governs whether an
    /// absent `answer_translated` is recorded as a fallback copy.
    pub translate_chat: bool,
}

/// Orchestrates the session KV store and the durable user-scoped store.
///
/// `on_request_started`/`on_request_finalized` are the only methods
/// `finalize` and `load_conversation_history` call; history-write failures
/// here are logged and swallowed by the caller, never fatal.
#[async_trait]
pub trait ConversationHistoryService: Send + Sync {
    /// Start (or resume) a turn, binding `session_id` to `identity_id` on
    /// first use. Idempotent: repeat calls with the same
    /// `(session_id, request_id)` return the same `turn_id`. Fails on
    /// attempted re-binding to a different identity.
    async fn on_request_started(
        &self,
        session_id: &str,
        request_id: &str,
        identity_id: Option<&str>,
        user_query: &str,
    ) -> Result<Uuid>;

    /// Record the finalized answer for a turn started earlier. Fails if no
    /// matching turn exists.
    async fn on_request_finalized(&self, request: FinalizeTurnRequest) -> Result<()>;

    /// The most recent finalized `(question, answer)` pairs for a session,
    /// oldest first, limited to `limit`.
    async fn get_recent_qa_neutral(&self, session_id: &str, limit: u32) -> Result<Vec<QaPair>>;
}
