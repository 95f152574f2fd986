// SPDX-License-Identifier: MIT OR Apache-2.0
//! Converts internal trace events into the UI-facing JSON messages a
//! work-callback stream carries, gated by a run's resolved
//! [`CallbackPolicy`].
//!
//! There is no translator collaborator wired into the broker, so
//! `summary_translated` currently mirrors `summary`; a real translation
//! hook would sit here without changing the summary shape.

use rag_core::callback::{CallbackPolicy, StageVisibility};
use rag_core::state::State;
use rag_core::trace::{Event, StepTraceEvent};
use serde_json::{json, Value};

const DOC_PREVIEW_CHARS: usize = 280;
const DOC_MARKDOWN_CHARS: usize = 12_000;
const MAX_DOC_PREVIEWS: usize = 20;

enum Stage {
    Retrieval,
    ModelCall,
}

fn stage_for_action(action: &str) -> Option<Stage> {
    match action {
        "search_nodes" | "fetch_node_texts" | "manage_context_budget" => Some(Stage::Retrieval),
        "call_model" => Some(Stage::ModelCall),
        _ => None,
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let truncated: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        format!("{truncated}…")
    } else {
        truncated
    }
}

/// Summarize one trace event under `policy`, or return `None` if callbacks
/// are disabled, the action is unrecognized, or the owning stage is hidden.
#[must_use]
pub fn summarize(policy: &CallbackPolicy, event: &Event, state: &State) -> Option<Value> {
    if !policy.enabled {
        return None;
    }
    match event {
        Event::Enqueue { target_step_id, topic, payload_summary } => Some(json!({
            "type": "queue",
            "queue_event": "enqueue",
            "target_step_id": target_step_id,
            "topic": topic,
            "payload": payload_summary,
        })),
        Event::Consume { step_id, messages } => Some(json!({
            "type": "queue",
            "queue_event": "consume",
            "step_id": step_id,
            "count": messages.len(),
        })),
        Event::RunEnd { step_id, remaining_inbox } => Some(json!({
            "type": "run_end",
            "step_id": step_id,
            "remaining_inbox": remaining_inbox,
        })),
        Event::Step(step_event) => summarize_step(policy, step_event, state),
    }
}

fn summarize_step(policy: &CallbackPolicy, ev: &StepTraceEvent, state: &State) -> Option<Value> {
    let stage = stage_for_action(&ev.action)?;
    let visibility = match stage {
        Stage::Retrieval => policy.retrieval_visibility,
        Stage::ModelCall => policy.model_call_visibility,
    };
    if visibility != StageVisibility::Show {
        return None;
    }

    let mut docs: Option<Vec<Value>> = None;
    let (summary, details) = match ev.action.as_str() {
        "search_nodes" => {
            let hits = state.retrieval_hits.len();
            let mode = state.retrieval_mode.clone().unwrap_or_else(|| "unknown".to_string());
            (
                format!("Searched ({mode}): {hits} result(s)"),
                json!({ "mode": mode, "query": state.retrieval_query, "hits": hits }),
            )
        }
        "fetch_node_texts" => {
            let fetched = state.node_texts.len();
            if policy.include_documents {
                docs = Some(
                    state
                        .node_texts
                        .iter()
                        .take(MAX_DOC_PREVIEWS)
                        .map(|nt| {
                            json!({
                                "id": nt.id,
                                "path": nt.path,
                                "text_len": nt.text.chars().count(),
                                "preview": preview(&nt.text, DOC_PREVIEW_CHARS),
                                "markdown": preview(&nt.text, DOC_MARKDOWN_CHARS),
                            })
                        })
                        .collect(),
                );
            }
            (format!("Fetched {fetched} document(s)"), json!({ "fetched": fetched }))
        }
        "manage_context_budget" => {
            let blocks = state.context_blocks.len();
            (format!("Packed context into {blocks} block(s)"), json!({ "context_blocks": blocks }))
        }
        "call_model" => {
            let response_chars = state.last_model_response.as_ref().map(String::len).unwrap_or(0);
            let response_preview = state.last_model_response.as_deref().map(|s| preview(s, DOC_PREVIEW_CHARS));
            ("Model responded".to_string(), json!({ "response_chars": response_chars, "preview": response_preview }))
        }
        _ => unreachable!("stage_for_action only recognizes the four action names above"),
    };

    let mut value = json!({
        "type": "step",
        "step_id": ev.step_id,
        "action": ev.action,
        "summary": summary,
        "summary_translated": summary,
        "details": details,
    });
    if let Some(docs) = docs {
        value["docs"] = json!(docs);
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rag_core::graph::NodeText;
    use rag_core::state::HitSummary;

    fn step_event(action: &str) -> StepTraceEvent {
        StepTraceEvent {
            ts_utc: Utc::now(),
            step_id: "s1".into(),
            action: action.into(),
            next_default: None,
            next_resolved: None,
            action_class: action.into(),
            action_id: action.into(),
            input: Value::Null,
            output: Value::Null,
            error: None,
            state_after: Value::Null,
        }
    }

    #[test]
    fn disabled_policy_emits_nothing() {
        let state = State::new("q", "s", "c");
        let ev = Event::Step(step_event("call_model"));
        assert!(summarize(&CallbackPolicy::disabled(), &ev, &state).is_none());
    }

    #[test]
    fn unrecognized_action_emits_nothing() {
        let policy = CallbackPolicy {
            enabled: true,
            include_documents: true,
            router_visibility: StageVisibility::Show,
            retrieval_visibility: StageVisibility::Show,
            model_call_visibility: StageVisibility::Show,
        };
        let state = State::new("q", "s", "c");
        let ev = Event::Step(step_event("set_variables"));
        assert!(summarize(&policy, &ev, &state).is_none());
    }

    #[test]
    fn hidden_stage_suppresses_recognized_action() {
        let mut policy = CallbackPolicy {
            enabled: true,
            include_documents: true,
            router_visibility: StageVisibility::Show,
            retrieval_visibility: StageVisibility::Show,
            model_call_visibility: StageVisibility::Hide,
        };
        let state = State::new("q", "s", "c");
        let ev = Event::Step(step_event("call_model"));
        assert!(summarize(&policy, &ev, &state).is_none());

        policy.model_call_visibility = StageVisibility::Show;
        assert!(summarize(&policy, &ev, &state).is_some());
    }

    #[test]
    fn fetch_node_texts_includes_docs_only_when_policy_allows() {
        let policy_with_docs = CallbackPolicy {
            enabled: true,
            include_documents: true,
            router_visibility: StageVisibility::Show,
            retrieval_visibility: StageVisibility::Show,
            model_call_visibility: StageVisibility::Show,
        };
        let mut state = State::new("q", "s", "c");
        state.node_texts.push(NodeText {
            id: "n1".into(),
            text: "a".repeat(400),
            path: Some("src/a.rs".into()),
            metadata_context: None,
        });
        let ev = Event::Step(step_event("fetch_node_texts"));

        let shown = summarize(&policy_with_docs, &ev, &state).unwrap();
        let docs = shown["docs"].as_array().unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0]["preview"].as_str().unwrap().ends_with('…'));

        let mut policy_no_docs = policy_with_docs;
        policy_no_docs.include_documents = false;
        let hidden = summarize(&policy_no_docs, &ev, &state).unwrap();
        assert!(hidden.get("docs").is_none());
    }

    #[test]
    fn search_nodes_summary_reports_mode_and_hit_count() {
        let policy = CallbackPolicy {
            enabled: true,
            include_documents: false,
            router_visibility: StageVisibility::Show,
            retrieval_visibility: StageVisibility::Show,
            model_call_visibility: StageVisibility::Show,
        };
        let mut state = State::new("q", "s", "c");
        state.retrieval_mode = Some("bm25".into());
        state.retrieval_hits.push(HitSummary { id: "n1".into(), score: 1.0, rank: 0 });
        let ev = Event::Step(step_event("search_nodes"));

        let summary = summarize(&policy, &ev, &state).unwrap();
        assert_eq!(summary["summary"], "Searched (bm25): 1 result(s)");
        assert_eq!(summary["details"]["hits"], 1);
    }

    #[test]
    fn enqueue_and_consume_are_summarized_regardless_of_stage_policy() {
        let policy = CallbackPolicy {
            enabled: true,
            include_documents: false,
            router_visibility: StageVisibility::Hide,
            retrieval_visibility: StageVisibility::Hide,
            model_call_visibility: StageVisibility::Hide,
        };
        let state = State::new("q", "s", "c");

        let enqueue = Event::Enqueue {
            target_step_id: "finalize".into(),
            topic: "demand".into(),
            payload_summary: Value::Null,
        };
        let summary = summarize(&policy, &enqueue, &state).unwrap();
        assert_eq!(summary["queue_event"], "enqueue");

        let consume = Event::Consume { step_id: "finalize".into(), messages: Vec::new() };
        let summary = summarize(&policy, &consume, &state).unwrap();
        assert_eq!(summary["queue_event"], "consume");
    }
}
