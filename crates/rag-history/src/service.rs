// SPDX-License-Identifier: MIT OR Apache-2.0
//! Orchestrates the session store and the durable store behind the
//! `ConversationHistoryService` contract `finalize`/`load_conversation_history`
//! depend on.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use rag_core::conversation::{ConversationHistoryService, ConversationTurn, FinalizeTurnRequest, QaPair};
use rag_error::{ErrorCode, RagError, Result};

use crate::durable_store::DurableStore;
use crate::session_store::SessionStore;

/// The default `ConversationHistoryService` implementation: an ephemeral
/// session store backing every turn, mirrored into a durable store once an
/// identity is known.
pub struct ConversationHistoryServiceImpl {
    session_store: SessionStore,
    durable_store: DurableStore,
    session_identity: Mutex<HashMap<String, String>>,
}

impl ConversationHistoryServiceImpl {
    /// Build the service from explicit stores.
    #[must_use]
    pub fn new(session_store: SessionStore, durable_store: DurableStore) -> Self {
        Self { session_store, durable_store, session_identity: Mutex::new(HashMap::new()) }
    }

    /// Build the service with a session store sized from
    /// `APP_CONV_HIST_MAX_TURNS`/`APP_CONV_HIST_TTL_S` and a fresh durable
    /// store.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(SessionStore::from_env(), DurableStore::new())
    }

    fn bind_identity(&self, session_id: &str, identity_id: Option<&str>) -> Result<()> {
        let Some(identity_id) = identity_id else { return Ok(()) };
        let mut bindings = self.session_identity.lock().expect("identity binding mutex poisoned");
        match bindings.get(session_id) {
            Some(existing) if existing != identity_id => Err(RagError::new(
                ErrorCode::IdentityRebind,
                format!("session '{session_id}' is already bound to a different identity"),
            )
            .with_context("session_id", session_id)
            .with_context("bound_identity_id", existing.clone())
            .with_context("requested_identity_id", identity_id)),
            _ => {
                bindings.insert(session_id.to_string(), identity_id.to_string());
                Ok(())
            }
        }
    }
}

impl Default for ConversationHistoryServiceImpl {
    fn default() -> Self {
        Self::from_env()
    }
}

#[async_trait]
impl ConversationHistoryService for ConversationHistoryServiceImpl {
    async fn on_request_started(
        &self,
        session_id: &str,
        request_id: &str,
        identity_id: Option<&str>,
        user_query: &str,
    ) -> Result<Uuid> {
        self.bind_identity(session_id, identity_id)?;

        let now = Utc::now();
        let turn_id = self.session_store.start_turn(
            session_id,
            request_id,
            identity_id.map(str::to_string),
            user_query,
            now,
        );

        if identity_id.is_some() {
            let pending = ConversationTurn {
                turn_id,
                session_id: session_id.to_string(),
                request_id: request_id.to_string(),
                user_id: identity_id.map(str::to_string),
                user_query: user_query.to_string(),
                answer_neutral: None,
                answer_translated: None,
                answer_translated_is_fallback: false,
                created_at_utc: now,
                updated_at_utc: now,
                finalized_at_utc: None,
            };
            self.durable_store.insert_turn(pending);
        }

        Ok(turn_id)
    }

    async fn on_request_finalized(&self, request: FinalizeTurnRequest) -> Result<()> {
        let now = Utc::now();
        let found = self.session_store.finalize_turn(
            &request.session_id,
            request.turn_id,
            &request.answer_neutral,
            request.answer_translated.clone(),
            request.translate_chat,
            now,
        );
        if !found {
            return Err(RagError::new(
                ErrorCode::MissingTurn,
                format!("no turn '{}' in session '{}' to finalize", request.turn_id, request.session_id),
            ));
        }

        if request.identity_id.is_some() {
            if let Err(e) = self.durable_store.upsert_turn_final(
                &request.session_id,
                request.turn_id,
                &request.answer_neutral,
                request.answer_translated.clone(),
                request.translate_chat,
                now,
            ) {
                // The session store write already succeeded; the durable
                // mirror lagging behind is logged, not fatal to this call.
                warn!(target: "rag.history", error = %e, turn_id = %request.turn_id, "durable store finalize failed");
            }
        }

        Ok(())
    }

    async fn get_recent_qa_neutral(&self, session_id: &str, limit: u32) -> Result<Vec<QaPair>> {
        let turns = self.session_store.recent_finalized(session_id, limit);
        Ok(turns
            .into_iter()
            .filter_map(|t| {
                let answer_neutral = t.answer_neutral?;
                if t.user_query.is_empty() || answer_neutral.is_empty() {
                    return None;
                }
                Some(QaPair { question_neutral: t.user_query, answer_neutral })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_then_finalize_round_trips_through_get_recent_qa_neutral() {
        let service = ConversationHistoryServiceImpl::new(SessionStore::new(200, None), DurableStore::new());
        let turn_id = service.on_request_started("s1", "r1", None, "what is this").await.unwrap();
        service
            .on_request_finalized(FinalizeTurnRequest {
                session_id: "s1".into(),
                request_id: "r1".into(),
                identity_id: None,
                turn_id,
                answer_neutral: "it is a thing".into(),
                answer_translated: None,
                translate_chat: false,
            })
            .await
            .unwrap();

        let pairs = service.get_recent_qa_neutral("s1", 10).await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].question_neutral, "what is this");
        assert_eq!(pairs[0].answer_neutral, "it is a thing");
    }

    #[tokio::test]
    async fn repeat_request_id_returns_the_same_turn_id() {
        let service = ConversationHistoryServiceImpl::new(SessionStore::new(200, None), DurableStore::new());
        let a = service.on_request_started("s1", "r1", None, "q").await.unwrap();
        let b = service.on_request_started("s1", "r1", None, "q again").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn rebinding_a_session_to_a_different_identity_fails() {
        let service = ConversationHistoryServiceImpl::new(SessionStore::new(200, None), DurableStore::new());
        service.on_request_started("s1", "r1", Some("alice"), "q").await.unwrap();
        let err = service.on_request_started("s1", "r2", Some("bob"), "q2").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::IdentityRebind);
    }

    #[tokio::test]
    async fn finalizing_an_unknown_turn_fails() {
        let service = ConversationHistoryServiceImpl::new(SessionStore::new(200, None), DurableStore::new());
        let err = service
            .on_request_finalized(FinalizeTurnRequest {
                session_id: "s1".into(),
                request_id: "r1".into(),
                identity_id: None,
                turn_id: Uuid::new_v4(),
                answer_neutral: "answer".into(),
                answer_translated: None,
                translate_chat: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingTurn);
    }

    #[tokio::test]
    async fn identity_backed_turns_are_mirrored_into_the_durable_store() {
        let service = ConversationHistoryServiceImpl::new(SessionStore::new(200, None), DurableStore::new());
        let turn_id = service.on_request_started("s1", "r1", Some("alice"), "q").await.unwrap();
        service
            .on_request_finalized(FinalizeTurnRequest {
                session_id: "s1".into(),
                request_id: "r1".into(),
                identity_id: Some("alice".into()),
                turn_id,
                answer_neutral: "answer".into(),
                answer_translated: None,
                translate_chat: false,
            })
            .await
            .unwrap();

        let durable = service.durable_store.list_recent_finalized_turns_by_session("s1", 10);
        assert_eq!(durable.len(), 1);
    }
}
