// SPDX-License-Identifier: MIT OR Apache-2.0
//! `expand_dependency_tree`: expand the dependency graph from the current
//! retrieval seeds.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use rag_core::graph::GraphProvider;
use rag_core::pipeline::StepDef;
use rag_core::state::State;
use rag_engine::{Action, Runtime};
use rag_error::Result;

use crate::params::{str_list, u32_or};

const DEFAULT_MAX_DEPTH: u32 = 2;
/// Edge type names the allowlist recognizes with this prefix are stripped
/// down to their bare form before being sent to the provider; it exists so
/// pipeline authors can write `allow:calls` for readability without the
/// provider needing to know about the prefix.
const ALLOW_PREFIX: &str = "allow:";

/// Expands `state.retrieval_seed_nodes` through the dependency graph.
pub struct ExpandDependencyTree {
    graph: Arc<dyn GraphProvider>,
}

impl ExpandDependencyTree {
    /// Build the action against a graph provider.
    #[must_use]
    pub fn new(graph: Arc<dyn GraphProvider>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Action for ExpandDependencyTree {
    fn action_id(&self) -> &str {
        "expand_dependency_tree"
    }

    fn log_in(&self, _step: &StepDef, state: &State) -> Value {
        json!({ "seeds": state.retrieval_seed_nodes.len() })
    }

    fn log_out(&self, _next: &Option<String>, state: &State) -> Value {
        json!({
            "expanded": state.graph_expanded_nodes.len(),
            "edges": state.graph_edges.len(),
        })
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        let seeds = if state.retrieval_seed_nodes.is_empty() {
            state.graph_seed_nodes.clone()
        } else {
            state.retrieval_seed_nodes.clone()
        };

        let max_depth = u32_or(step, "max_depth", DEFAULT_MAX_DEPTH);
        let edge_types: Vec<String> = str_list(step, "edge_types")
            .into_iter()
            .map(|t| t.strip_prefix(ALLOW_PREFIX).map(str::to_string).unwrap_or(t))
            .collect();

        let result = self.graph.expand(&seeds, max_depth, &edge_types).await?;

        // Dedupe nodes/edges the provider may repeat across BFS layers.
        let mut seen_nodes = HashSet::new();
        let expanded: Vec<String> = result
            .expanded_nodes
            .into_iter()
            .filter(|n| seen_nodes.insert(n.clone()))
            .collect();

        let mut seen_edges = HashSet::new();
        let edges: Vec<_> = result
            .edges
            .into_iter()
            .filter(|e| seen_edges.insert((e.from.clone(), e.to.clone(), e.edge_type.clone())))
            .collect();

        state.graph_seed_nodes = seeds;
        state.graph_expanded_nodes = expanded;
        state.graph_edges = edges;

        Ok(step.next().map(str::to_string))
    }
}
