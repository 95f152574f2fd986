// SPDX-License-Identifier: MIT OR Apache-2.0
//! `fetch_node_texts`: fetch text for retrieval/graph candidates, in the
//! configured prioritization order, skipping (never truncating) candidates
//! that would blow the per-step character budget.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use rag_core::graph::GraphProvider;
use rag_core::pipeline::StepDef;
use rag_core::state::State;
use rag_engine::{Action, Runtime};
use rag_error::{ErrorCode, RagError, Result};

use crate::params::{opt_str, u32_or};

const DEFAULT_MAX_TOTAL_CHARS: u32 = 60_000;

/// How candidate node ids from `search_nodes` and `expand_dependency_tree`
/// are ordered before fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrioritizationMode {
    /// Retrieval seeds first, then graph-expanded nodes.
    SeedFirst,
    /// Graph-expanded nodes first, then retrieval seeds.
    GraphFirst,
    /// Interleaved, one from each source in turn, seeds first on ties.
    Balanced,
}

impl PrioritizationMode {
    fn parse(s: &str) -> Self {
        match s {
            "graph_first" => Self::GraphFirst,
            "balanced" => Self::Balanced,
            _ => Self::SeedFirst,
        }
    }

    fn order(self, seeds: &[String], expanded: &[String]) -> Vec<String> {
        match self {
            Self::SeedFirst => seeds.iter().chain(expanded.iter()).cloned().collect(),
            Self::GraphFirst => expanded.iter().chain(seeds.iter()).cloned().collect(),
            Self::Balanced => {
                let mut out = Vec::with_capacity(seeds.len() + expanded.len());
                let mut si = seeds.iter();
                let mut ei = expanded.iter();
                loop {
                    match (si.next(), ei.next()) {
                        (Some(s), Some(e)) => {
                            out.push(s.clone());
                            out.push(e.clone());
                        }
                        (Some(s), None) => out.push(s.clone()),
                        (None, Some(e)) => out.push(e.clone()),
                        (None, None) => break,
                    }
                }
                out
            }
        }
    }
}

/// Fetches node text for this step's candidates.
pub struct FetchNodeTexts {
    graph: Arc<dyn GraphProvider>,
}

impl FetchNodeTexts {
    /// Build the action against a graph provider.
    #[must_use]
    pub fn new(graph: Arc<dyn GraphProvider>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Action for FetchNodeTexts {
    fn action_id(&self) -> &str {
        "fetch_node_texts"
    }

    fn log_in(&self, _step: &StepDef, state: &State) -> Value {
        json!({
            "seeds": state.retrieval_seed_nodes.len(),
            "expanded": state.graph_expanded_nodes.len(),
        })
    }

    fn log_out(&self, _next: &Option<String>, state: &State) -> Value {
        json!({ "fetched": state.node_texts.len() })
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        let branch = state.branch.clone().ok_or_else(|| {
            RagError::new(ErrorCode::InvalidStepParameter, format!("step '{}': branch is not set", step.id))
        })?;

        let mode = PrioritizationMode::parse(opt_str(step, "prioritization").unwrap_or("seed_first"));
        let mut seen = HashSet::new();
        let candidates: Vec<String> = mode
            .order(&state.retrieval_seed_nodes, &state.graph_expanded_nodes)
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let fetched = self.graph.fetch_node_texts(&candidates, &branch).await?;
        let by_id: std::collections::HashMap<_, _> =
            fetched.into_iter().map(|t| (t.id.clone(), t)).collect();

        let max_total_chars = u32_or(step, "max_total_chars", DEFAULT_MAX_TOTAL_CHARS) as usize;

        state.node_texts.clear();
        let mut total = 0usize;
        for id in candidates {
            let Some(text) = by_id.get(&id) else { continue };
            let len = text.text.len();
            if total + len > max_total_chars {
                // Skip, don't truncate: a partial node body is worse than a
                // missing one for downstream prompting.
                continue;
            }
            total += len;
            state.node_texts.push(text.clone());
        }

        Ok(step.next().map(str::to_string))
    }
}
