// SPDX-License-Identifier: MIT OR Apache-2.0
//! The ephemeral per-session KV store: one `{by_request, turns}` record per
//! `session_id`, capped at `max_turns`, with best-effort TTL eviction.
//!
//! Stands in for the Redis/SQL-backed session store named in the history
//! design — the contract (idempotent `start_turn`, capped `finalize_turn`)
//! is what the orchestrating service depends on, not the backing technology.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use rag_core::conversation::ConversationTurn;

const DEFAULT_MAX_TURNS: usize = 200;

#[derive(Debug, Default)]
struct SessionRecord {
    by_request: HashMap<String, Uuid>,
    turns: Vec<ConversationTurn>,
    last_write_utc: Option<DateTime<Utc>>,
}

/// In-memory session store, keyed by `session_id`.
pub struct SessionStore {
    records: Mutex<HashMap<String, SessionRecord>>,
    max_turns: usize,
    ttl: Option<Duration>,
}

impl SessionStore {
    /// Build a store capping each session's turn list and, when `ttl` is
    /// set, discarding a session's record once it has gone stale.
    #[must_use]
    pub fn new(max_turns: usize, ttl: Option<Duration>) -> Self {
        Self { records: Mutex::new(HashMap::new()), max_turns, ttl }
    }

    /// Build a store from `APP_CONV_HIST_MAX_TURNS`/`APP_CONV_HIST_TTL_S`,
    /// defaulting to 200 turns and no TTL.
    #[must_use]
    pub fn from_env() -> Self {
        let max_turns = std::env::var("APP_CONV_HIST_MAX_TURNS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_TURNS);
        let ttl = std::env::var("APP_CONV_HIST_TTL_S")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .map(Duration::seconds);
        Self::new(max_turns, ttl)
    }

    /// Idempotent turn start: returns the existing turn id for a repeat
    /// `(session_id, request_id)`, otherwise creates and records a pending
    /// turn.
    pub fn start_turn(
        &self,
        session_id: &str,
        request_id: &str,
        user_id: Option<String>,
        user_query: &str,
        now: DateTime<Utc>,
    ) -> Uuid {
        let mut records = self.records.lock().expect("session store mutex poisoned");
        let record = records.entry(session_id.to_string()).or_default();
        self.evict_if_stale(record, now);

        if let Some(existing) = record.by_request.get(request_id) {
            return *existing;
        }

        let turn = ConversationTurn::new_pending(session_id, request_id, user_id, user_query, now);
        let turn_id = turn.turn_id;
        record.by_request.insert(request_id.to_string(), turn_id);
        record.turns.push(turn);
        self.cap(record);
        record.last_write_utc = Some(now);
        debug!(target: "rag.history", session_id, %turn_id, "session store: turn started");
        turn_id
    }

    /// Update the matching turn in place. Returns `false` if no turn with
    /// `turn_id` exists in this session's record (the session may have
    /// expired, or `turn_id` may belong to another session).
    pub fn finalize_turn(
        &self,
        session_id: &str,
        turn_id: Uuid,
        answer_neutral: &str,
        answer_translated: Option<String>,
        translate_chat: bool,
        now: DateTime<Utc>,
    ) -> bool {
        let mut records = self.records.lock().expect("session store mutex poisoned");
        let Some(record) = records.get_mut(session_id) else { return false };
        let Some(turn) = record.turns.iter_mut().find(|t| t.turn_id == turn_id) else {
            return false;
        };
        turn.finalize(answer_neutral, answer_translated, translate_chat, now);
        record.last_write_utc = Some(now);
        debug!(target: "rag.history", session_id, %turn_id, "session store: turn finalized");
        true
    }

    /// Finalized turns for `session_id`, oldest first, limited to the most
    /// recent `limit`.
    pub fn recent_finalized(&self, session_id: &str, limit: u32) -> Vec<ConversationTurn> {
        let records = self.records.lock().expect("session store mutex poisoned");
        let Some(record) = records.get(session_id) else { return Vec::new() };
        let finalized: Vec<ConversationTurn> =
            record.turns.iter().filter(|t| t.is_finalized()).cloned().collect();
        let skip = finalized.len().saturating_sub(limit as usize);
        finalized.into_iter().skip(skip).collect()
    }

    fn cap(&self, record: &mut SessionRecord) {
        if record.turns.len() > self.max_turns {
            let drop = record.turns.len() - self.max_turns;
            let dropped: Vec<Uuid> = record.turns.drain(0..drop).map(|t| t.turn_id).collect();
            record.by_request.retain(|_, v| !dropped.contains(v));
        }
    }

    fn evict_if_stale(&self, record: &mut SessionRecord, now: DateTime<Utc>) {
        let Some(ttl) = self.ttl else { return };
        let Some(last_write) = record.last_write_utc else { return };
        if now - last_write > ttl {
            record.turns.clear();
            record.by_request.clear();
        }
    }
}
