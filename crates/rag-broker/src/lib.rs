// SPDX-License-Identifier: MIT OR Apache-2.0
//! rag-broker
//!
//! The work-callback broker: a `run_id`-keyed ring buffer plus subscriber
//! fan-out, policy-aware event summarization, and a TTL sweep for closed
//! runs. `rag-daemon`'s SSE controller is the only intended caller.

mod broker;
mod summarize;

pub use broker::{Broker, BrokerStats, StreamHandle, DEFAULT_RING_CAPACITY, DEFAULT_TTL_MINUTES};
pub use summarize::summarize;
