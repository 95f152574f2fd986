// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical node ids and the graph-provider contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use rag_error::{ErrorCode, RagError, Result};

/// A parsed canonical node id: `"<repo>::<snapshot_id>::<kind>::<local_id>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeId {
    /// Raw string form, as stored everywhere else on `State`.
    pub raw: String,
    /// Repository component.
    pub repo: String,
    /// Snapshot component.
    pub snapshot_id: String,
    /// Node kind (e.g. `"class"`, `"function"`, `"file"`).
    pub kind: String,
    /// Opaque local id within `(repo, snapshot_id, kind)`.
    pub local_id: String,
}

impl NodeId {
    /// Parse a canonical node id. Fails with
    /// [`ErrorCode::InvalidStepParameter`] if the id does not have exactly
    /// four `::`-separated components.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.splitn(4, "::").collect();
        let [repo, snapshot_id, kind, local_id] = parts.as_slice() else {
            return Err(RagError::new(
                ErrorCode::InvalidStepParameter,
                "node id must have the form <repo>::<snapshot_id>::<kind>::<local_id>",
            )
            .with_context("node_id", raw));
        };
        Ok(Self {
            raw: raw.to_string(),
            repo: (*repo).to_string(),
            snapshot_id: (*snapshot_id).to_string(),
            kind: (*kind).to_string(),
            local_id: (*local_id).to_string(),
        })
    }

    /// Build a canonical node id from its parts.
    #[must_use]
    pub fn format(repo: &str, snapshot_id: &str, kind: &str, local_id: &str) -> String {
        format!("{repo}::{snapshot_id}::{kind}::{local_id}")
    }
}

/// A directed edge between two canonical node ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source node id.
    pub from: String,
    /// Destination node id.
    pub to: String,
    /// Edge type/label (e.g. `"calls"`, `"imports"`, `"contains"`).
    #[serde(rename = "type")]
    pub edge_type: String,
}

/// The result of a graph expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionResult {
    /// Nodes discovered, in BFS order (seeds excluded).
    pub expanded_nodes: Vec<String>,
    /// Edges discovered along the way.
    pub edges: Vec<GraphEdge>,
}

/// A fetched node's text plus optional path/metadata context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeText {
    /// Node id.
    pub id: String,
    /// Fetched (and possibly compacted) text.
    pub text: String,
    /// File path, if known.
    pub path: Option<String>,
    /// Free-form metadata surfaced alongside the text.
    pub metadata_context: Option<serde_json::Value>,
}

/// A collaborator able to expand the dependency graph and fetch node text.
#[async_trait]
pub trait GraphProvider: Send + Sync {
    /// Expand from `seeds` up to `max_depth` hops, restricted to edge types
    /// in `edge_types` when non-empty.
    async fn expand(
        &self,
        seeds: &[String],
        max_depth: u32,
        edge_types: &[String],
    ) -> Result<ExpansionResult>;

    /// Fetch text (and path/metadata) for each requested node id, on the
    /// given branch.
    async fn fetch_node_texts(&self, node_ids: &[String], branch: &str) -> Result<Vec<NodeText>>;

    /// Restrict `node_ids` to those visible to `user_id`. The default
    /// implementation performs no filtering; providers backed by an
    /// access-controlled store should override it.
    async fn filter_by_permissions(
        &self,
        node_ids: Vec<String>,
        _user_id: Option<&str>,
    ) -> Result<Vec<String>> {
        Ok(node_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_four_components() {
        let id = NodeId::parse("acme/widgets::snap-1::class::Foo").unwrap();
        assert_eq!(id.repo, "acme/widgets");
        assert_eq!(id.snapshot_id, "snap-1");
        assert_eq!(id.kind, "class");
        assert_eq!(id.local_id, "Foo");
    }

    #[test]
    fn parse_rejects_too_few_components() {
        assert!(NodeId::parse("repo::snap::class").is_err());
    }

    #[test]
    fn format_round_trips_with_parse() {
        let raw = NodeId::format("r", "s", "k", "l");
        let parsed = NodeId::parse(&raw).unwrap();
        assert_eq!(parsed.raw, raw);
    }
}
