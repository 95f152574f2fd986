// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-run mutable state.
//!
//! A `State` is owned by exactly one run, executing on exactly one thread.
//! Cross-run sharing happens only through the collaborators a run talks to
//! (retrieval backend, graph provider, history service, broker), never
//! through `State` itself.

use std::collections::{BTreeMap, HashSet};

use rag_error::{ErrorCode, RagError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::graph::{GraphEdge, NodeText};
use crate::trace::Event;

/// A message addressed to a specific step id, consumed when the engine
/// enters that step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// The step this message is addressed to.
    pub target_step_id: String,
    /// Application-defined topic (e.g. `"config"`, `"demand"`).
    pub topic: String,
    /// JSON-serializable payload, or `None`.
    pub payload: Option<Value>,
    /// The step that enqueued this message, if known.
    pub sender_step_id: Option<String>,
}

/// A `{id, score, rank}` summary of a retrieval hit, stored on `State`
/// after `search_nodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitSummary {
    /// Node id.
    pub id: String,
    /// Backend-reported relevance score.
    pub score: f64,
    /// Rank in the response (0-based).
    pub rank: usize,
}

/// One turn of conversation history rendered for prompting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogTurn {
    /// `"user"` or `"assistant"`.
    pub role: String,
    /// Turn content.
    pub content: String,
}

/// Per-run mutable record threaded through every action invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    // -- Identity -----------------------------------------------------
    /// The user's raw query.
    pub user_query: String,
    /// Session identifier.
    pub session_id: String,
    /// Opaque identifier for the caller (client/service name).
    pub consultant: String,
    /// Request identifier; used for idempotent turn creation.
    pub request_id: Option<String>,
    /// The durable turn id assigned by `load_conversation_history`'s call to
    /// `on_request_started`, consumed by `finalize`.
    pub turn_id: Option<uuid::Uuid>,
    /// Source-control branch, required by `fetch_node_texts`.
    pub branch: Option<String>,
    /// Authenticated user/identity id, if any.
    pub user_id: Option<String>,
    /// Target repository.
    pub repository: Option<String>,
    /// Primary snapshot id.
    pub snapshot_id: Option<String>,
    /// Secondary snapshot id (used by `parallel_roads`).
    pub snapshot_id_b: Option<String>,
    /// Snapshot-set id, for membership checks.
    pub snapshot_set_id: Option<String>,
    /// Whether answers should be translated to the UI language.
    pub translate_chat: bool,
    /// Set by `translate_in_if_needed` when translation was requested but no
    /// translator was available, so the neutral text was used as-is.
    pub translate_fallback: bool,

    // -- Router / parse artifacts --------------------------------------
    /// The most recent raw model response.
    pub last_model_response: Option<String>,
    /// The prefix matched by `prefix_router`, or `""` if none matched.
    pub last_prefix: Option<String>,
    /// Resolved retrieval mode for the current/last `search_nodes` call.
    pub retrieval_mode: Option<String>,
    /// The query text used for the current/last retrieval.
    pub retrieval_query: Option<String>,
    /// Sacred retrieval filters; security-origin keys must never be
    /// overwritten by model-parsed fields.
    pub retrieval_filters: Map<String, Value>,
    /// Every query string sent to the retrieval backend, in first-seen order.
    pub retrieval_queries_asked: Vec<String>,
    /// Normalized (lowercased, whitespace-collapsed) form of the above, used
    /// by `repeat_query_guard`.
    pub retrieval_queries_asked_norm: HashSet<String>,

    // -- Retrieval outputs ----------------------------------------------
    /// Node ids returned by the last `search_nodes`, in response order.
    pub retrieval_seed_nodes: Vec<String>,
    /// `{id, score, rank}` summaries of the last search.
    pub retrieval_hits: Vec<HitSummary>,
    /// Seeds handed to graph expansion.
    pub graph_seed_nodes: Vec<String>,
    /// Nodes discovered by graph expansion (BFS order).
    pub graph_expanded_nodes: Vec<String>,
    /// Edges discovered by graph expansion.
    pub graph_edges: Vec<GraphEdge>,
    /// Free-form debug annotations from retrieval/graph actions.
    pub graph_debug: Map<String, Value>,
    /// Fetched node texts.
    pub node_texts: Vec<NodeText>,

    // -- Context ----------------------------------------------------
    /// Conversation history rendered as alternating user/assistant turns.
    pub history_dialog: Vec<DialogTurn>,
    /// Conversation history rendered as prompt blocks.
    pub history_blocks: Vec<String>,
    /// Packed context blocks; persists for the run's lifetime unless an
    /// action explicitly clears it (e.g. `parallel_roads` merge/fork).
    pub context_blocks: Vec<String>,

    // -- Answers ----------------------------------------------------
    /// Neutral (language-agnostic) answer text.
    pub answer_neutral: Option<String>,
    /// UI-language answer text.
    pub answer_translated: Option<String>,
    /// Neutral banner text.
    pub banner_neutral: Option<String>,
    /// UI-language banner text.
    pub banner_translated: Option<String>,
    /// The materialized user-visible answer, set by `finalize`.
    pub final_answer: Option<String>,

    // -- Inbox ----------------------------------------------------
    /// Messages not yet consumed by their target step.
    pub inbox: Vec<Message>,
    /// Messages consumed on the most recent step entry.
    pub inbox_last_consumed: Vec<Message>,

    // -- Diagnostics ----------------------------------------------------
    /// Trace events, appended in strict execution order.
    pub pipeline_trace_events: Vec<Event>,
    /// Per-step visit counters, used by `loop_guard`.
    pub loop_counters: BTreeMap<String, u32>,
    /// Step ids visited so far, in order (may contain repeats).
    pub steps_used: Vec<String>,
}

impl State {
    /// Construct a fresh `State` for a new run. Starts with an empty inbox
    /// and empty trace, per the run-start invariant.
    #[must_use]
    pub fn new(
        user_query: impl Into<String>,
        session_id: impl Into<String>,
        consultant: impl Into<String>,
    ) -> Self {
        Self {
            user_query: user_query.into(),
            session_id: session_id.into(),
            consultant: consultant.into(),
            request_id: None,
            turn_id: None,
            branch: None,
            user_id: None,
            repository: None,
            snapshot_id: None,
            snapshot_id_b: None,
            snapshot_set_id: None,
            translate_chat: false,
            translate_fallback: false,
            last_model_response: None,
            last_prefix: None,
            retrieval_mode: None,
            retrieval_query: None,
            retrieval_filters: Map::new(),
            retrieval_queries_asked: Vec::new(),
            retrieval_queries_asked_norm: HashSet::new(),
            retrieval_seed_nodes: Vec::new(),
            retrieval_hits: Vec::new(),
            graph_seed_nodes: Vec::new(),
            graph_expanded_nodes: Vec::new(),
            graph_edges: Vec::new(),
            graph_debug: Map::new(),
            node_texts: Vec::new(),
            history_dialog: Vec::new(),
            history_blocks: Vec::new(),
            context_blocks: Vec::new(),
            answer_neutral: None,
            answer_translated: None,
            banner_neutral: None,
            banner_translated: None,
            final_answer: None,
            inbox: Vec::new(),
            inbox_last_consumed: Vec::new(),
            pipeline_trace_events: Vec::new(),
            loop_counters: BTreeMap::new(),
            steps_used: Vec::new(),
        }
    }

    /// Normalize a query the way the repeat guard and `search_nodes` do:
    /// lowercase, collapse internal whitespace, trim ends.
    #[must_use]
    pub fn normalize_query(q: &str) -> String {
        q.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Record a query as having been sent to the retrieval backend,
    /// deduplicating by normalized form.
    pub fn record_query_asked(&mut self, query: &str) {
        let norm = Self::normalize_query(query);
        if self.retrieval_queries_asked_norm.insert(norm) {
            self.retrieval_queries_asked.push(query.to_string());
        }
    }

    /// Enqueue a message for a future step. Validates non-empty
    /// `target_step_id`/`topic`, verifies the payload JSON-serializes to a
    /// primitives-only value, and appends an `Enqueue` trace event with a
    /// truncated payload summary.
    pub fn enqueue_message(
        &mut self,
        target_step_id: impl Into<String>,
        topic: impl Into<String>,
        payload: Option<Value>,
        sender_step_id: Option<String>,
    ) -> Result<()> {
        let target_step_id = target_step_id.into();
        let topic = topic.into();
        if target_step_id.trim().is_empty() {
            return Err(RagError::new(
                ErrorCode::InvalidStepParameter,
                "enqueue_message: target_step_id must not be empty",
            ));
        }
        if topic.trim().is_empty() {
            return Err(RagError::new(
                ErrorCode::InvalidStepParameter,
                "enqueue_message: topic must not be empty",
            ));
        }
        if let Some(ref p) = payload {
            // Round-trip through JSON to verify primitives-only content; a
            // value that is already a `serde_json::Value` always survives
            // this, so the check is really about catching NaN/Infinity.
            serde_json::to_string(p).map_err(|e| {
                RagError::new(
                    ErrorCode::InvalidStepParameter,
                    "enqueue_message: payload is not JSON-serializable",
                )
                .with_source(e)
            })?;
        }

        let summary = truncate_payload_summary(payload.as_ref());
        self.inbox.push(Message {
            target_step_id: target_step_id.clone(),
            topic: topic.clone(),
            payload,
            sender_step_id,
        });
        self.pipeline_trace_events.push(Event::Enqueue {
            target_step_id,
            topic,
            payload_summary: summary,
        });
        Ok(())
    }

    /// Consume every message addressed to `step_id`, preserving the order
    /// of messages that remain. Sets `inbox_last_consumed`. Returns the
    /// consumed messages (also stored on `inbox_last_consumed`).
    pub fn consume_for_step(&mut self, step_id: &str, trace: bool) -> Vec<Message> {
        let (matched, remaining): (Vec<_>, Vec<_>) = self
            .inbox
            .drain(..)
            .partition(|m| m.target_step_id == step_id);
        self.inbox = remaining;
        self.inbox_last_consumed = matched.clone();
        if trace {
            self.pipeline_trace_events.push(Event::Consume {
                step_id: step_id.to_string(),
                messages: matched.clone(),
            });
        }
        matched
    }

    /// Re-enqueue the consumed `demand` messages for a later attempt
    /// (used by `manage_context_budget` on `on_over`).
    pub fn requeue_consumed(&mut self, messages: Vec<Message>) {
        self.inbox.extend(messages);
    }

    /// A shallow JSON snapshot of the run-relevant fields, used as the
    /// trace wrapper's `state_after`.
    #[must_use]
    pub fn shallow_snapshot(&self) -> Value {
        serde_json::json!({
            "session_id": self.session_id,
            "retrieval_mode": self.retrieval_mode,
            "retrieval_seed_nodes": self.retrieval_seed_nodes.len(),
            "graph_expanded_nodes": self.graph_expanded_nodes.len(),
            "node_texts": self.node_texts.len(),
            "context_blocks": self.context_blocks.len(),
            "inbox": self.inbox.len(),
            "last_prefix": self.last_prefix,
        })
    }
}

fn truncate_payload_summary(payload: Option<&Value>) -> Value {
    const MAX_LEN: usize = 256;
    match payload {
        None => Value::Null,
        Some(v) => {
            let s = v.to_string();
            if s.len() <= MAX_LEN {
                v.clone()
            } else {
                Value::String(format!("{}…", &s[..MAX_LEN]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_starts_with_empty_inbox_and_trace() {
        let s = State::new("q", "sess", "consultant");
        assert!(s.inbox.is_empty());
        assert!(s.pipeline_trace_events.is_empty());
    }

    #[test]
    fn enqueue_rejects_empty_target_or_topic() {
        let mut s = State::new("q", "sess", "c");
        assert!(s.enqueue_message("", "topic", None, None).is_err());
        assert!(s.enqueue_message("step", "", None, None).is_err());
    }

    #[test]
    fn enqueue_then_consume_preserves_order_of_remaining() {
        let mut s = State::new("q", "sess", "c");
        s.enqueue_message("a", "t1", None, None).unwrap();
        s.enqueue_message("b", "t2", None, None).unwrap();
        s.enqueue_message("a", "t3", None, None).unwrap();

        let consumed = s.consume_for_step("a", true);
        assert_eq!(consumed.len(), 2);
        assert_eq!(consumed[0].topic, "t1");
        assert_eq!(consumed[1].topic, "t3");
        assert_eq!(s.inbox.len(), 1);
        assert_eq!(s.inbox[0].topic, "t2");
        assert_eq!(s.inbox_last_consumed.len(), 2);
    }

    #[test]
    fn consume_for_step_emits_trace_event_when_enabled() {
        let mut s = State::new("q", "sess", "c");
        s.enqueue_message("a", "t1", None, None).unwrap();
        s.consume_for_step("a", true);
        // one Enqueue event + one Consume event
        assert_eq!(s.pipeline_trace_events.len(), 2);
    }

    #[test]
    fn consume_for_step_respects_trace_flag() {
        let mut s = State::new("q", "sess", "c");
        s.enqueue_message("a", "t1", None, None).unwrap();
        s.consume_for_step("a", false);
        assert_eq!(s.pipeline_trace_events.len(), 1);
    }

    #[test]
    fn normalize_query_lowercases_and_collapses_whitespace() {
        assert_eq!(State::normalize_query("  Class   Foo "), "class foo");
    }

    #[test]
    fn record_query_asked_dedupes_by_normalized_form() {
        let mut s = State::new("q", "sess", "c");
        s.record_query_asked("Class Foo");
        s.record_query_asked("class   foo");
        s.record_query_asked("Other");
        assert_eq!(s.retrieval_queries_asked, vec!["Class Foo", "Other"]);
        assert_eq!(s.retrieval_queries_asked_norm.len(), 2);
    }

    #[test]
    fn requeue_consumed_puts_messages_back_in_inbox() {
        let mut s = State::new("q", "sess", "c");
        s.enqueue_message("a", "demand", None, None).unwrap();
        let consumed = s.consume_for_step("a", false);
        assert!(s.inbox.is_empty());
        s.requeue_consumed(consumed);
        assert_eq!(s.inbox.len(), 1);
    }
}
