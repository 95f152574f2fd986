// SPDX-License-Identifier: MIT OR Apache-2.0
//! Search requests/hits and the retrieval-backend contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Map;

use rag_error::Result;

/// How a search should be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    /// Embedding similarity only.
    Semantic,
    /// Lexical (BM25) only.
    Bm25,
    /// Both, combined by the backend's fusion strategy.
    Hybrid,
}

impl SearchType {
    /// Parse the wire string a step parameter carries (`"semantic"`,
    /// `"bm25"`, `"hybrid"`), case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "semantic" => Some(Self::Semantic),
            "bm25" => Some(Self::Bm25),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

/// A request to the retrieval backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query text.
    pub query: String,
    /// Requested search strategy.
    pub search_type: SearchType,
    /// Target repository.
    pub repository: String,
    /// Snapshot to search within.
    pub snapshot_id: String,
    /// Security-origin filters; never overwritten by model-parsed fields.
    pub filters: Map<String, serde_json::Value>,
    /// Maximum hits to return.
    pub top_k: u32,
    /// Whether the backend should rerank results (semantic only).
    pub rerank: bool,
}

/// A single retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    /// Canonical node id.
    pub id: String,
    /// Backend relevance score.
    pub score: f64,
    /// Short text preview, if the backend provides one.
    pub snippet: Option<String>,
}

/// The retrieval backend's response to a [`SearchRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Hits, in backend-ranked order.
    pub hits: Vec<Hit>,
}

/// A collaborator able to answer [`SearchRequest`]s.
///
/// Implementations must not mutate `request.filters`; `search_nodes` is
/// responsible for treating filters sourced from identity/security context
/// as immutable before this is ever called.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Execute a search.
    async fn search(&self, request: SearchRequest) -> Result<SearchResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(SearchType::parse("Semantic"), Some(SearchType::Semantic));
        assert_eq!(SearchType::parse("BM25"), Some(SearchType::Bm25));
        assert_eq!(SearchType::parse("hybrid"), Some(SearchType::Hybrid));
        assert_eq!(SearchType::parse("nonsense"), None);
    }
}
