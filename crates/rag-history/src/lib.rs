// SPDX-License-Identifier: MIT OR Apache-2.0
//! Conversation history: an ephemeral per-session store, a durable
//! user-scoped store, and the orchestrating `ConversationHistoryService`
//! implementation the pipeline actions depend on.

mod durable_store;
mod service;
mod session_store;

pub use durable_store::DurableStore;
pub use service::ConversationHistoryServiceImpl;
pub use session_store::SessionStore;
