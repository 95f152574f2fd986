// SPDX-License-Identifier: MIT OR Apache-2.0
//! rag-error
//!
//! Error taxonomy for the RAG pipeline engine.
//!
//! One error type, `RagError`, carries a machine-readable `ErrorCode`, a
//! human message, optional structured context, and an optional source
//! error. Every fallible operation in this workspace returns
//! `rag_error::Result<T>`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The conceptual error kinds from the error-handling design: configuration,
/// contract violations inside an action, budget misconfiguration, security
/// abuse, external-collaborator failure, state inconsistency, and
/// transient/IO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid YAML, missing entry step, unknown action, bad step reference.
    Configuration,
    /// Missing/invalid step parameter, raised inside `do_execute`.
    Contract,
    /// Retrieval texts alone exceed `max_context_tokens`.
    Budget,
    /// Snapshot-set membership or mismatched snapshot ids.
    Security,
    /// History write, prompt template read, translator failure.
    Collaborator,
    /// Identity re-binding, missing turn on finalize.
    State,
    /// Raised by a collaborator; the engine does not retry.
    Io,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::Contract => "contract",
            Self::Budget => "budget",
            Self::Security => "security",
            Self::Collaborator => "collaborator",
            Self::State => "state",
            Self::Io => "io",
        };
        f.write_str(s)
    }
}

/// Stable, machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The pipeline YAML failed to parse.
    InvalidYaml,
    /// `extends` formed a cycle.
    ExtendsCycle,
    /// A referenced `extends` path escapes `pipelines_root`.
    PathEscape,
    /// `settings.entry_step_id` is missing or does not name a step.
    MissingEntryStep,
    /// A step names an action that is not registered.
    UnknownAction,
    /// A `next`/`on_*` value does not name a defined step id.
    UnknownStepReference,
    /// An action was invoked with a missing or invalid parameter.
    InvalidStepParameter,
    /// `search_nodes` received an invalid `search_type`.
    InvalidSearchType,
    /// `search_nodes` requested `rerank` with a non-semantic search type.
    InvalidRerankCombination,
    /// `search_nodes` is missing a required `repository`.
    MissingRepository,
    /// `search_nodes` is missing a required snapshot id.
    MissingSnapshot,
    /// Incoming retrieval texts alone exceed `max_context_tokens`.
    BudgetMisconfig,
    /// `auto_clamp` could not find a clamp that satisfies the budget.
    BudgetClampInfeasible,
    /// `snapshot_id` is not a member of the requested `snapshot_set_id`.
    SnapshotNotInSet,
    /// Seed node ids reference more than one `(repo, snapshot_id)` pair.
    MismatchedSnapshotIds,
    /// A conversation history write failed (non-fatal at the call site).
    HistoryWriteFailed,
    /// A prompt template could not be read.
    PromptTemplateReadFailed,
    /// `session_id` is already bound to a different `identity_id`.
    IdentityRebind,
    /// `finalize_turn`/`upsert_turn_final` found no matching turn.
    MissingTurn,
    /// A collaborator call failed transiently (I/O, timeout, etc).
    TransientIo,
    /// `RAG_PIPELINE_INBOX_FAIL_FAST` is set and the inbox is non-empty at `RUN_END`.
    InboxNotEmpty,
    /// An unexpected internal invariant was violated.
    Internal,
}

impl ErrorCode {
    /// The category this code belongs to.
    #[must_use]
    pub fn category(self) -> ErrorCategory {
        use ErrorCategory as C;
        match self {
            Self::InvalidYaml
            | Self::ExtendsCycle
            | Self::PathEscape
            | Self::MissingEntryStep
            | Self::UnknownAction
            | Self::UnknownStepReference => C::Configuration,
            Self::InvalidStepParameter
            | Self::InvalidSearchType
            | Self::InvalidRerankCombination
            | Self::MissingRepository
            | Self::MissingSnapshot => C::Contract,
            Self::BudgetMisconfig | Self::BudgetClampInfeasible => C::Budget,
            Self::SnapshotNotInSet | Self::MismatchedSnapshotIds => C::Security,
            Self::HistoryWriteFailed | Self::PromptTemplateReadFailed => C::Collaborator,
            Self::IdentityRebind | Self::MissingTurn | Self::InboxNotEmpty => C::State,
            Self::TransientIo => C::Io,
            Self::Internal => C::State,
        }
    }

    /// SCREAMING_SNAKE_CASE wire form, matching the serde rename.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidYaml => "INVALID_YAML",
            Self::ExtendsCycle => "EXTENDS_CYCLE",
            Self::PathEscape => "PATH_ESCAPE",
            Self::MissingEntryStep => "MISSING_ENTRY_STEP",
            Self::UnknownAction => "UNKNOWN_ACTION",
            Self::UnknownStepReference => "UNKNOWN_STEP_REFERENCE",
            Self::InvalidStepParameter => "INVALID_STEP_PARAMETER",
            Self::InvalidSearchType => "INVALID_SEARCH_TYPE",
            Self::InvalidRerankCombination => "INVALID_RERANK_COMBINATION",
            Self::MissingRepository => "MISSING_REPOSITORY",
            Self::MissingSnapshot => "MISSING_SNAPSHOT",
            Self::BudgetMisconfig => "PIPELINE_BUDGET_MISCONFIG",
            Self::BudgetClampInfeasible => "BUDGET_CLAMP_INFEASIBLE",
            Self::SnapshotNotInSet => "SNAPSHOT_NOT_IN_SET",
            Self::MismatchedSnapshotIds => "MISMATCHED_SNAPSHOT_IDS",
            Self::HistoryWriteFailed => "HISTORY_WRITE_FAILED",
            Self::PromptTemplateReadFailed => "PROMPT_TEMPLATE_READ_FAILED",
            Self::IdentityRebind => "IDENTITY_REBIND",
            Self::MissingTurn => "MISSING_TURN",
            Self::TransientIo => "TRANSIENT_IO",
            Self::InboxNotEmpty => "PIPELINE_INBOX_NOT_EMPTY",
            Self::Internal => "INTERNAL",
        }
    }

    const ALL: &'static [ErrorCode] = &[
        Self::InvalidYaml,
        Self::ExtendsCycle,
        Self::PathEscape,
        Self::MissingEntryStep,
        Self::UnknownAction,
        Self::UnknownStepReference,
        Self::InvalidStepParameter,
        Self::InvalidSearchType,
        Self::InvalidRerankCombination,
        Self::MissingRepository,
        Self::MissingSnapshot,
        Self::BudgetMisconfig,
        Self::BudgetClampInfeasible,
        Self::SnapshotNotInSet,
        Self::MismatchedSnapshotIds,
        Self::HistoryWriteFailed,
        Self::PromptTemplateReadFailed,
        Self::IdentityRebind,
        Self::MissingTurn,
        Self::TransientIo,
        Self::InboxNotEmpty,
        Self::Internal,
    ];
}

/// The workspace's single error type.
pub struct RagError {
    code: ErrorCode,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    context: BTreeMap<String, serde_json::Value>,
}

impl RagError {
    /// Construct a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a structured context key/value pair. Values that fail to
    /// serialize are silently skipped rather than failing error
    /// construction.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The category derived from the code.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// The context bag attached to this error.
    #[must_use]
    pub fn context(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.context
    }
}

impl fmt::Debug for RagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RagError")
            .field("code", &self.code.as_str())
            .field("message", &self.message)
            .field("context", &self.context)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl fmt::Display for RagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for RagError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// A serializable snapshot of a [`RagError`], without the opaque `source`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagErrorDto {
    /// SCREAMING_SNAKE_CASE error code.
    pub code: String,
    /// The category the code belongs to.
    pub category: ErrorCategory,
    /// Human-readable message.
    pub message: String,
    /// Structured context attached at raise time.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl From<&RagError> for RagErrorDto {
    fn from(e: &RagError) -> Self {
        Self {
            code: e.code.as_str().to_string(),
            category: e.code.category(),
            message: e.message.clone(),
            context: e.context.clone(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RagError>;
