// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end pipeline scenarios, run through the real engine with
//! in-memory mock collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use rag_actions::{register_all, Collaborators};
use rag_core::conversation::{ConversationHistoryService, FinalizeTurnRequest, QaPair};
use rag_core::graph::{ExpansionResult, GraphEdge, GraphProvider, NodeText};
use rag_core::model::{ModelClient, ModelRequest};
use rag_core::pipeline::{PipelineDef, StepDef};
use rag_core::retrieval::{Hit, RetrievalBackend, SearchRequest, SearchResponse};
use rag_core::state::State;
use rag_engine::{Engine, Runtime};
use rag_error::Result;

struct MockRetrieval;
#[async_trait]
impl RetrievalBackend for MockRetrieval {
    async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        Ok(SearchResponse {
            hits: vec![
                Hit { id: format!("acme::snap-1::class::{}", request.query.replace(' ', "_")), score: 0.9, snippet: None },
                Hit { id: "acme::snap-1::class::Other".into(), score: 0.4, snippet: None },
            ],
        })
    }
}

struct MockGraph;
#[async_trait]
impl GraphProvider for MockGraph {
    async fn expand(&self, seeds: &[String], _max_depth: u32, _edge_types: &[String]) -> Result<ExpansionResult> {
        let expanded: Vec<String> = seeds.iter().map(|s| format!("{s}::dep")).collect();
        let edges = seeds
            .iter()
            .zip(expanded.iter())
            .map(|(from, to)| GraphEdge { from: from.clone(), to: to.clone(), edge_type: "calls".into() })
            .collect();
        Ok(ExpansionResult { expanded_nodes: expanded, edges })
    }

    async fn fetch_node_texts(&self, node_ids: &[String], _branch: &str) -> Result<Vec<NodeText>> {
        Ok(node_ids
            .iter()
            .map(|id| NodeText { id: id.clone(), text: format!("body of {id}"), path: None, metadata_context: None })
            .collect())
    }
}

struct MockModel;
#[async_trait]
impl ModelClient for MockModel {
    async fn ask(&self, request: ModelRequest) -> Result<String> {
        Ok(format!("model answer for: {}", request.prompt.lines().last().unwrap_or_default()))
    }
}

struct MockHistory;
#[async_trait]
impl ConversationHistoryService for MockHistory {
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

fn engine() -> Engine {
    let collaborators = Collaborators {
        retrieval: Arc::new(MockRetrieval),
        graph: Arc::new(MockGraph),
        model: Arc::new(MockModel),
        history: Arc::new(MockHistory),
        query_logger: None,
    };
    Engine::new(register_all(collaborators))
}

fn step(id: &str, action: &str, raw: Map<String, Value>) -> StepDef {
    StepDef { id: id.into(), action: action.into(), raw }
}

fn settings(entry: &str) -> Map<String, Value> {
    let mut s = Map::new();
    s.insert("entry_step_id".into(), json!(entry));
    s
}

#[tokio::test]
async fn bm25_retrieve_then_answer() {
    let pipeline = PipelineDef {
        name: "retrieve-then-answer".into(),
        settings: settings("search"),
        steps: vec![
            step("search", "search_nodes", {
                let mut r = Map::new();
                r.insert("search_type".into(), json!("bm25"));
                r.insert("next".into(), json!("answer"));
                r
            }),
            step("answer", "call_model", {
                let mut r = Map::new();
                r.insert("prompt_template".into(), json!("Question: {{question}}"));
                r.insert("produces_answer".into(), json!(true));
                r.insert("next".into(), json!("finalize"));
                r
            }),
            step("finalize", "finalize", {
                let mut r = Map::new();
                r.insert("end".into(), json!(true));
                r
            }),
        ],
    };

    let mut state = State::new("where is Widget defined", "session-1", "consultant");
    state.repository = Some("acme/widgets".into());
    state.snapshot_id = Some("snap-1".into());

    let runtime = Runtime::default();
    engine().run(&pipeline, &mut state, &runtime).await.unwrap();

    assert_eq!(state.retrieval_mode.as_deref(), Some("bm25"));
    assert_eq!(state.retrieval_seed_nodes.len(), 2);
    assert!(state.final_answer.unwrap().starts_with("model answer for"));
}

#[tokio::test]
async fn dependency_expand_and_fetch_node_texts() {
    let pipeline = PipelineDef {
        name: "expand-and-fetch".into(),
        settings: settings("search"),
        steps: vec![
            step("search", "search_nodes", {
                let mut r = Map::new();
                r.insert("search_type".into(), json!("hybrid"));
                r.insert("next".into(), json!("expand"));
                r
            }),
            step("expand", "expand_dependency_tree", {
                let mut r = Map::new();
                r.insert("max_depth".into(), json!(1));
                r.insert("next".into(), json!("fetch"));
                r
            }),
            step("fetch", "fetch_node_texts", {
                let mut r = Map::new();
                r.insert("prioritization".into(), json!("seed_first"));
                r.insert("end".into(), json!(true));
                r
            }),
        ],
    };

    let mut state = State::new("Widget class", "session-1", "consultant");
    state.repository = Some("acme/widgets".into());
    state.snapshot_id = Some("snap-1".into());
    state.branch = Some("main".into());

    let runtime = Runtime::default();
    engine().run(&pipeline, &mut state, &runtime).await.unwrap();

    assert!(!state.graph_expanded_nodes.is_empty());
    assert!(!state.node_texts.is_empty());
    assert!(state.node_texts.iter().any(|t| t.text.starts_with("body of")));
}

#[tokio::test]
async fn repeat_query_guard_routes_when_a_suggested_query_was_already_asked() {
    // `search` asks the original question, then a `set_variables` step
    // simulates the model proposing a fresh query (so the second search
    // isn't trivially a repeat of itself), then a third step proposes the
    // *original* question again — which `guard` must recognize as a repeat.
    let pipeline = PipelineDef {
        name: "repeat-guard".into(),
        settings: settings("search"),
        steps: vec![
            step("search", "search_nodes", {
                let mut r = Map::new();
                r.insert("next".into(), json!("propose_new_query"));
                r
            }),
            step("propose_new_query", "set_variables", {
                let mut r = Map::new();
                r.insert(
                    "rules".into(),
                    json!([{"op": "copy", "to": "retrieval_query", "value": "different query"}]),
                );
                r.insert("next".into(), json!("search_again"));
                r
            }),
            step("search_again", "search_nodes", {
                let mut r = Map::new();
                r.insert("next".into(), json!("propose_repeat_query"));
                r
            }),
            step("propose_repeat_query", "set_variables", {
                let mut r = Map::new();
                r.insert(
                    "rules".into(),
                    json!([{"op": "copy", "to": "retrieval_query", "value": "Widget class"}]),
                );
                r.insert("next".into(), json!("guard"));
                r
            }),
            step("guard", "repeat_query_guard", {
                let mut r = Map::new();
                r.insert("on_repeat".into(), json!("done"));
                r.insert("next".into(), json!("not_repeat"));
                r
            }),
            step("not_repeat", "finalize", {
                let mut r = Map::new();
                r.insert("end".into(), json!(true));
                r
            }),
            step("done", "finalize", {
                let mut r = Map::new();
                r.insert("end".into(), json!(true));
                r
            }),
        ],
    };

    let mut state = State::new("Widget class", "session-1", "consultant");
    state.repository = Some("acme/widgets".into());
    state.snapshot_id = Some("snap-1".into());

    let runtime = Runtime::default();
    engine().run(&pipeline, &mut state, &runtime).await.unwrap();

    assert!(state.steps_used.contains(&"done".to_string()));
    assert!(!state.steps_used.contains(&"not_repeat".to_string()));
}

#[tokio::test]
async fn budget_over_limit_falls_back_to_demand_requeue() {
    let pipeline = PipelineDef {
        name: "budget-over".into(),
        settings: settings("search"),
        steps: vec![
            step("search", "search_nodes", {
                let mut r = Map::new();
                r.insert("next".into(), json!("expand"));
                r
            }),
            step("expand", "expand_dependency_tree", {
                let mut r = Map::new();
                r.insert("next".into(), json!("fetch"));
                r
            }),
            step("fetch", "fetch_node_texts", {
                let mut r = Map::new();
                r.insert("next".into(), json!("budget"));
                r
            }),
            step("budget", "manage_context_budget", {
                let mut r = Map::new();
                r.insert("max_context_tokens".into(), json!(1));
                r.insert("demand_step_id".into(), json!("retry_search"));
                r.insert("on_ok".into(), json!("finalize"));
                r.insert("on_over".into(), json!("finalize"));
                r
            }),
            step("finalize", "finalize", {
                let mut r = Map::new();
                r.insert("end".into(), json!(true));
                r
            }),
        ],
    };

    let mut state = State::new("Widget class", "session-1", "consultant");
    state.repository = Some("acme/widgets".into());
    state.snapshot_id = Some("snap-1".into());
    state.branch = Some("main".into());

    let runtime = Runtime::default();
    engine().run(&pipeline, &mut state, &runtime).await.unwrap();

    // `fail_fast` (the default policy) committed nothing, and a demand
    // message for `retry_search` should still be sitting in the inbox
    // since the run never reaches that step.
    assert!(state.context_blocks.is_empty());
    assert_eq!(state.inbox.len(), 1);
    assert_eq!(state.inbox[0].topic, "demand");
    assert_eq!(state.inbox[0].target_step_id, "retry_search");
}
