// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic in-memory collaborators for local iteration: a pipeline
//! file can be run end to end against these without a live retrieval
//! backend, graph provider, model, or history store wired up.
//!
//! `rag-cli`'s `run` subcommand and `rag-daemon`'s run-submission endpoint
//! both build a [`Collaborators`] from [`demo_collaborators`] rather than
//! each rolling their own fixtures.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use rag_core::conversation::{ConversationHistoryService, FinalizeTurnRequest, QaPair};
use rag_core::graph::{ExpansionResult, GraphEdge, GraphProvider, NodeText};
use rag_core::model::{ModelClient, ModelRequest};
use rag_core::retrieval::{Hit, RetrievalBackend, SearchRequest, SearchResponse};
use rag_error::Result;

use crate::Collaborators;

/// Returns two fixed hits per query: one named after the query itself, one
/// a constant fallback.
struct DemoRetrieval;

#[async_trait]
impl RetrievalBackend for DemoRetrieval {
    async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let repo = &request.repository;
        let snapshot = &request.snapshot_id;
        let slug = request.query.split_whitespace().collect::<Vec<_>>().join("_");
        Ok(SearchResponse {
            hits: vec![
                Hit { id: format!("{repo}::{snapshot}::class::{slug}"), score: 0.91, snippet: None },
                Hit { id: format!("{repo}::{snapshot}::class::Other"), score: 0.42, snippet: None },
            ],
        })
    }
}

/// Expands every seed into one synthetic dependency and fabricates node
/// text from the node id.
struct DemoGraph;

#[async_trait]
impl GraphProvider for DemoGraph {
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
            .map(|id| NodeText { id: id.clone(), text: format!("demo body of {id}"), path: None, metadata_context: None })
            .collect())
    }
}

/// Echoes the last line of the rendered prompt back as the answer.
struct DemoModel;

#[async_trait]
impl ModelClient for DemoModel {
    async fn ask(&self, request: ModelRequest) -> Result<String> {
        let question = request.prompt.lines().last().unwrap_or_default();
        Ok(format!("demo answer for: {question}"))
    }
}

/// Records nothing; every turn starts as a nil uuid and no history is ever
/// returned.
struct DemoHistory;

#[async_trait]
impl ConversationHistoryService for DemoHistory {
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

/// A fixed, deterministic set of collaborators suitable for running a
/// pipeline file with no external dependencies.
#[must_use]
pub fn demo_collaborators() -> Collaborators {
    Collaborators {
        retrieval: Arc::new(DemoRetrieval),
        graph: Arc::new(DemoGraph),
        model: Arc::new(DemoModel),
        history: Arc::new(DemoHistory),
        query_logger: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_core::retrieval::SearchType;

    #[tokio::test]
    async fn demo_retrieval_returns_two_deterministic_hits() {
        let backend = DemoRetrieval;
        let response = backend
            .search(SearchRequest {
                query: "widget class".into(),
                search_type: SearchType::Hybrid,
                top_k: 10,
                rerank: false,
                repository: "acme".into(),
                snapshot_id: "snap-1".into(),
                filters: serde_json::Map::new(),
            })
            .await
            .unwrap();
        assert_eq!(response.hits.len(), 2);
        assert!(response.hits[0].id.contains("widget_class"));
    }

    #[tokio::test]
    async fn demo_model_echoes_the_last_prompt_line() {
        let model = DemoModel;
        let answer = model
            .ask(ModelRequest { prompt: "line one\nwhat is this?".into(), max_tokens: None, history_dialog: None })
            .await
            .unwrap();
        assert_eq!(answer, "demo answer for: what is this?");
    }
}
