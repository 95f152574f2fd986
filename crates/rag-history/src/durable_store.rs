// SPDX-License-Identifier: MIT OR Apache-2.0
//! The durable, user-scoped store: authoritative history for authenticated
//! identities, independent of the session KV store's `max_turns` cap.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use rag_core::conversation::ConversationTurn;
use rag_error::{ErrorCode, RagError, Result};

fn bucket_key(user_id: Option<&str>, session_id: &str) -> String {
    match user_id {
        Some(id) => format!("user:{id}"),
        None => format!("anon:{session_id}"),
    }
}

/// In-memory durable store, keyed by identity (or, for unauthenticated
/// sessions, by session id).
pub struct DurableStore {
    buckets: Mutex<HashMap<String, Vec<ConversationTurn>>>,
}

impl DurableStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { buckets: Mutex::new(HashMap::new()) }
    }

    /// Append a newly started turn.
    pub fn insert_turn(&self, turn: ConversationTurn) {
        let key = bucket_key(turn.user_id.as_deref(), &turn.session_id);
        let turn_id = turn.turn_id;
        self.buckets.lock().expect("durable store mutex poisoned").entry(key).or_default().push(turn);
        debug!(target: "rag.history", %turn_id, "durable store: turn inserted");
    }

    /// Finalize the turn matching `(turn_id, session_id)` in place.
    ///
    /// # Errors
    /// Returns [`ErrorCode::MissingTurn`] if no such turn was previously
    /// inserted.
    pub fn upsert_turn_final(
        &self,
        session_id: &str,
        turn_id: Uuid,
        answer_neutral: &str,
        answer_translated: Option<String>,
        translate_chat: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut buckets = self.buckets.lock().expect("durable store mutex poisoned");
        let turn = buckets
            .values_mut()
            .flat_map(|turns| turns.iter_mut())
            .find(|t| t.turn_id == turn_id && t.session_id == session_id)
            .ok_or_else(|| {
                RagError::new(
                    ErrorCode::MissingTurn,
                    format!("durable store: no turn '{turn_id}' for session '{session_id}'"),
                )
            })?;
        turn.finalize(answer_neutral, answer_translated, translate_chat, now);
        debug!(target: "rag.history", session_id, %turn_id, "durable store: turn finalized");
        Ok(())
    }

    /// Finalized turns for `session_id`, sorted by `finalized_at_utc`
    /// ascending, limited to the most recent `limit`.
    pub fn list_recent_finalized_turns_by_session(&self, session_id: &str, limit: u32) -> Vec<ConversationTurn> {
        let buckets = self.buckets.lock().expect("durable store mutex poisoned");
        let mut turns: Vec<ConversationTurn> = buckets
            .values()
            .flatten()
            .filter(|t| t.session_id == session_id && t.is_finalized())
            .cloned()
            .collect();
        turns.sort_by_key(|t| t.finalized_at_utc);
        let skip = turns.len().saturating_sub(limit as usize);
        turns.into_iter().skip(skip).collect()
    }
}

impl Default for DurableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_turn_final_fails_for_unknown_turn() {
        let store = DurableStore::new();
        let now = DateTime::UNIX_EPOCH;
        let err = store.upsert_turn_final("s1", Uuid::new_v4(), "answer", None, false, now).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingTurn);
    }

    #[test]
    fn insert_then_upsert_final_round_trips() {
        let store = DurableStore::new();
        let t0 = DateTime::UNIX_EPOCH;
        let turn = ConversationTurn::new_pending("s1", "r1", Some("u1".into()), "hello", t0);
        let turn_id = turn.turn_id;
        store.insert_turn(turn);

        store.upsert_turn_final("s1", turn_id, "world", None, false, t0).unwrap();
        let recent = store.list_recent_finalized_turns_by_session("s1", 10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].answer_neutral.as_deref(), Some("world"));
    }

    #[test]
    fn list_recent_finalized_turns_by_session_excludes_other_sessions() {
        let store = DurableStore::new();
        let t0 = DateTime::UNIX_EPOCH;

        let turn_a = ConversationTurn::new_pending("s1", "r1", Some("u1".into()), "q1", t0);
        let id_a = turn_a.turn_id;
        store.insert_turn(turn_a);
        store.upsert_turn_final("s1", id_a, "a1", None, false, t0).unwrap();

        let turn_b = ConversationTurn::new_pending("s2", "r2", Some("u1".into()), "q2", t0);
        let id_b = turn_b.turn_id;
        store.insert_turn(turn_b);
        store.upsert_turn_final("s2", id_b, "a2", None, false, t0).unwrap();

        let recent = store.list_recent_finalized_turns_by_session("s1", 10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].session_id, "s1");
    }
}
