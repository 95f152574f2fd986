// SPDX-License-Identifier: MIT OR Apache-2.0
//! The named actions a pipeline step can bind to.
//!
//! Each action implements [`rag_engine::Action`]; `register_all` wires every
//! action this crate knows about into a fresh [`rag_engine::ActionRegistry`]
//! under its canonical name, the same name the loader's validator checks
//! against when an allowlist is configured.

mod budget;
mod call_model;
pub mod demo;
mod expand;
mod fanout;
mod fetch;
mod finalize;
mod history;
mod inbox;
mod jsonish;
mod params;
mod query_log;
mod routing;
mod search;
mod translate;
mod vars;

pub use budget::{BudgetClamp, BudgetContractPolicy, BudgetContractResult, ManageContextBudget};
pub use call_model::CallModel;
pub use expand::ExpandDependencyTree;
pub use fanout::{ForkAction, MergeAction, ParallelRoads};
pub use fetch::{FetchNodeTexts, PrioritizationMode};
pub use finalize::Finalize;
pub use history::LoadConversationHistory;
pub use inbox::InboxDispatcher;
pub use query_log::QueryLogger;
pub use routing::{JsonDecisionRouter, LoopGuard, PrefixRouter, RepeatQueryGuard};
pub use search::SearchNodes;
pub use translate::TranslateInIfNeeded;
pub use vars::SetVariables;

use std::sync::Arc;

use rag_core::conversation::ConversationHistoryService;
use rag_core::graph::GraphProvider;
use rag_core::model::ModelClient;
use rag_core::retrieval::RetrievalBackend;
use rag_engine::ActionRegistry;

/// The collaborators every action-registering pipeline needs. Passed once at
/// startup; actions hold `Arc` clones of whichever of these they use.
pub struct Collaborators {
    /// Retrieval backend for `search_nodes`.
    pub retrieval: Arc<dyn RetrievalBackend>,
    /// Graph provider for `expand_dependency_tree`/`fetch_node_texts`.
    pub graph: Arc<dyn GraphProvider>,
    /// Model client for `call_model`.
    pub model: Arc<dyn ModelClient>,
    /// History service for `load_conversation_history`/`finalize`.
    pub history: Arc<dyn ConversationHistoryService>,
    /// Optional query logger for `search_nodes` (`WEAVIATE_QUERY_LOG`).
    pub query_logger: Option<Arc<QueryLogger>>,
}

/// Build a registry carrying every action this crate defines, bound to
/// `collaborators`.
#[must_use]
pub fn register_all(collaborators: Collaborators) -> ActionRegistry {
    let mut reg = ActionRegistry::new();
    reg.register("translate_in_if_needed", Arc::new(TranslateInIfNeeded));
    reg.register(
        "load_conversation_history",
        Arc::new(LoadConversationHistory::new(Arc::clone(&collaborators.history))),
    );
    reg.register("prefix_router", Arc::new(PrefixRouter));
    reg.register("json_decision_router", Arc::new(JsonDecisionRouter));
    reg.register("repeat_query_guard", Arc::new(RepeatQueryGuard));
    reg.register("inbox_dispatcher", Arc::new(InboxDispatcher));
    reg.register(
        "search_nodes",
        Arc::new(SearchNodes::new(
            Arc::clone(&collaborators.retrieval),
            collaborators.query_logger.clone(),
        )),
    );
    reg.register(
        "expand_dependency_tree",
        Arc::new(ExpandDependencyTree::new(Arc::clone(&collaborators.graph))),
    );
    reg.register(
        "fetch_node_texts",
        Arc::new(FetchNodeTexts::new(Arc::clone(&collaborators.graph))),
    );
    reg.register("manage_context_budget", Arc::new(ManageContextBudget));
    reg.register(
        "call_model",
        Arc::new(CallModel::new(Arc::clone(&collaborators.model))),
    );
    reg.register("loop_guard", Arc::new(LoopGuard));
    reg.register("set_variables", Arc::new(SetVariables));
    reg.register("parallel_roads", Arc::new(ParallelRoads));
    reg.register("fork_action", Arc::new(ForkAction));
    reg.register("merge_action", Arc::new(MergeAction));
    reg.register(
        "finalize",
        Arc::new(Finalize::new(Arc::clone(&collaborators.history))),
    );
    reg
}
