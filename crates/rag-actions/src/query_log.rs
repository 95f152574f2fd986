// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured JSONL logging of resolved retrieval queries, gated by
//! `WEAVIATE_QUERY_LOG`/`WEAVIATE_QUERY_LOG_DIR`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use tracing::warn;

use rag_core::retrieval::SearchRequest;

const DEFAULT_LOG_DIR: &str = ".";
const LOG_FILE_NAME: &str = "weaviate_queries.jsonl";

/// Appends one JSON line per resolved `search_nodes` request, when enabled.
pub struct QueryLogger {
    path: Mutex<PathBuf>,
}

impl QueryLogger {
    /// Build a logger writing under `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: Mutex::new(dir.into().join(LOG_FILE_NAME)),
        }
    }

    /// Build a logger from `WEAVIATE_QUERY_LOG`/`WEAVIATE_QUERY_LOG_DIR`, or
    /// `None` when logging is not enabled.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let enabled = std::env::var("WEAVIATE_QUERY_LOG").map(|v| v == "1").unwrap_or(false);
        if !enabled {
            return None;
        }
        let dir = std::env::var("WEAVIATE_QUERY_LOG_DIR").unwrap_or_else(|_| DEFAULT_LOG_DIR.to_string());
        Some(Self::new(dir))
    }

    /// Append one line describing `request`. Failures are logged via
    /// `tracing` and otherwise swallowed — a broken query log must never
    /// fail a run.
    pub fn log(&self, session_id: &str, request: &SearchRequest) {
        let line = serde_json::json!({
            "ts_utc": Utc::now(),
            "session_id": session_id,
            "query": request.query,
            "search_type": request.search_type,
            "repository": request.repository,
            "snapshot_id": request.snapshot_id,
            "top_k": request.top_k,
            "rerank": request.rerank,
        });

        let path = self.path.lock().expect("query logger mutex poisoned");
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&*path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            warn!(error = %e, path = %path.display(), "failed to write query log line");
        }
    }
}
