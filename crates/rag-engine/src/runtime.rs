// SPDX-License-Identifier: MIT OR Apache-2.0

/// Per-run engine settings, sourced from environment flags or overridden by
/// the caller.
#[derive(Debug, Clone, Copy)]
pub struct Runtime {
    /// Append a [`rag_core::trace::Event::Step`] per action invocation.
    /// Mirrors `RAG_PIPELINE_TRACE`.
    pub trace_enabled: bool,
    /// Fail the run if the inbox is non-empty at `RUN_END`. Mirrors
    /// `RAG_PIPELINE_INBOX_FAIL_FAST`.
    pub inbox_fail_fast: bool,
}

impl Runtime {
    /// Read flags from the process environment: `RAG_PIPELINE_TRACE` and
    /// `RAG_PIPELINE_INBOX_FAIL_FAST`, both `"0"`/`"1"`, defaulting to off.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            trace_enabled: env_flag("RAG_PIPELINE_TRACE"),
            inbox_fail_fast: env_flag("RAG_PIPELINE_INBOX_FAIL_FAST"),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            trace_enabled: true,
            inbox_fail_fast: false,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1").unwrap_or(false)
}
