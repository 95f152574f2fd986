// SPDX-License-Identifier: MIT OR Apache-2.0
//! `search_nodes`: resolve a retrieval request from step parameters and
//! current state, call the retrieval backend, and record the hits.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use rag_core::pipeline::StepDef;
use rag_core::retrieval::{RetrievalBackend, SearchRequest, SearchType};
use rag_core::state::{HitSummary, State};
use rag_engine::{Action, Runtime};
use rag_error::{ErrorCode, RagError, Result};

use crate::params::{bool_or, opt_str, str_list, u32_or};
use crate::query_log::QueryLogger;

const DEFAULT_TOP_K: u32 = 10;
const RERANK_WIDEN_FACTOR: u32 = 3;
const RERANK_WIDEN_CAP: u32 = 100;

/// Resolves and executes a retrieval request.
pub struct SearchNodes {
    backend: Arc<dyn RetrievalBackend>,
    query_logger: Option<Arc<QueryLogger>>,
}

impl SearchNodes {
    /// Build the action against a retrieval backend, optionally logging
    /// every resolved query when `query_logger` is set.
    #[must_use]
    pub fn new(backend: Arc<dyn RetrievalBackend>, query_logger: Option<Arc<QueryLogger>>) -> Self {
        Self { backend, query_logger }
    }
}

#[async_trait]
impl Action for SearchNodes {
    fn action_id(&self) -> &str {
        "search_nodes"
    }

    fn log_in(&self, _step: &StepDef, state: &State) -> Value {
        json!({ "repository": state.repository, "snapshot_id": state.snapshot_id })
    }

    fn log_out(&self, _next: &Option<String>, state: &State) -> Value {
        json!({ "hits": state.retrieval_hits.len() })
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        // 1. search_type
        let search_type_str = opt_str(step, "search_type").unwrap_or("hybrid");
        let search_type = SearchType::parse(search_type_str).ok_or_else(|| {
            RagError::new(
                ErrorCode::InvalidSearchType,
                format!("step '{}': unknown search_type '{search_type_str}'", step.id),
            )
        })?;

        // 2. rerank is semantic-only
        let rerank = bool_or(step, "rerank", false);
        if rerank && search_type != SearchType::Semantic {
            return Err(RagError::new(
                ErrorCode::InvalidRerankCombination,
                format!("step '{}': rerank requires search_type=semantic", step.id),
            ));
        }

        // 3/4. repository and snapshot are required
        let repository = state.repository.clone().ok_or_else(|| {
            RagError::new(ErrorCode::MissingRepository, format!("step '{}': repository is not set", step.id))
        })?;
        let snapshot_id = state.snapshot_id.clone().ok_or_else(|| {
            RagError::new(ErrorCode::MissingSnapshot, format!("step '{}': snapshot_id is not set", step.id))
        })?;

        // 5. snapshot-set membership, when the step restricts it
        let allowed_snapshots = str_list(step, "allowed_snapshot_ids");
        if let Some(set_id) = &state.snapshot_set_id {
            if !allowed_snapshots.is_empty() && !allowed_snapshots.contains(&snapshot_id) {
                return Err(RagError::new(
                    ErrorCode::SnapshotNotInSet,
                    format!("snapshot '{snapshot_id}' is not a member of set '{set_id}'"),
                ));
            }
        }

        // 6. sacred filters first, step-declared filters layered underneath,
        // then the base repo/snapshot scope written back in last so it wins.
        let mut filters = Map::new();
        if let Some(step_filters) = step.raw.get("filters").and_then(Value::as_object) {
            for (k, v) in step_filters {
                filters.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in &state.retrieval_filters {
            filters.insert(k.clone(), v.clone());
        }
        state.retrieval_filters.insert("repo".to_string(), json!(repository));
        state.retrieval_filters.insert("snapshot_id".to_string(), json!(snapshot_id));
        filters.insert("repo".to_string(), json!(repository));
        filters.insert("snapshot_id".to_string(), json!(snapshot_id));

        // 7. query text
        let query = opt_str(step, "query")
            .map(str::to_string)
            .or_else(|| state.retrieval_query.clone())
            .unwrap_or_else(|| state.user_query.clone());

        // 8/10. top_k, widened for reranking
        let top_k = u32_or(step, "top_k", DEFAULT_TOP_K);
        let requested_top_k = if rerank {
            (top_k * RERANK_WIDEN_FACTOR).min(RERANK_WIDEN_CAP)
        } else {
            top_k
        };

        let request = SearchRequest {
            query: query.clone(),
            search_type,
            repository,
            snapshot_id,
            filters,
            top_k: requested_top_k,
            rerank,
        };

        if let Some(logger) = &self.query_logger {
            logger.log(&state.session_id, &request);
        }

        // 9. call the backend
        let response = self.backend.search(request).await?;

        state.record_query_asked(&query);
        state.retrieval_mode = Some(search_type_str.to_string());
        state.retrieval_query = Some(query);

        let kept = response.hits.into_iter().take(top_k as usize);
        state.retrieval_seed_nodes.clear();
        state.retrieval_hits.clear();
        for (rank, hit) in kept.enumerate() {
            state.retrieval_seed_nodes.push(hit.id.clone());
            state.retrieval_hits.push(HitSummary {
                id: hit.id,
                score: hit.score,
                rank,
            });
        }

        Ok(step.next().map(str::to_string))
    }
}
