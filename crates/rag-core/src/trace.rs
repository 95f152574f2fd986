// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trace events appended to `State::pipeline_trace_events`.
//!
//! One [`Event::Step`] is appended per action invocation by the base-action
//! wrapper in `rag-engine`; `Event::Enqueue`/`Event::Consume` bracket inbox
//! activity; `Event::RunEnd` closes the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::Message;

/// A single entry in a run's trace buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// Emitted by `State::enqueue_message`.
    Enqueue {
        /// Step the message is addressed to.
        target_step_id: String,
        /// Message topic.
        topic: String,
        /// Truncated preview of the payload.
        payload_summary: Value,
    },
    /// Emitted on step entry when messages are consumed from the inbox.
    Consume {
        /// The step whose inbox was drained.
        step_id: String,
        /// The messages removed from the inbox.
        messages: Vec<Message>,
    },
    /// One per action invocation, emitted by the base-action wrapper.
    Step(StepTraceEvent),
    /// Emitted once, when the run reaches a step with `end: true`.
    RunEnd {
        /// The terminal step id.
        step_id: String,
        /// Number of inbox messages still unconsumed at run end.
        remaining_inbox: usize,
    },
}

/// The structured record the base-action wrapper appends per step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTraceEvent {
    /// UTC timestamp of the invocation.
    pub ts_utc: DateTime<Utc>,
    /// Step id.
    pub step_id: String,
    /// Action name as declared in the step.
    pub action: String,
    /// `step.raw["next"]`, if any.
    pub next_default: Option<String>,
    /// `next_override ?? next_default`.
    pub next_resolved: Option<String>,
    /// The action implementation's type name.
    pub action_class: String,
    /// The action's `action_id`.
    pub action_id: String,
    /// Best-effort JSON-ified `log_in` payload.
    pub input: Value,
    /// Best-effort JSON-ified `log_out` payload.
    pub output: Value,
    /// Set if `do_execute` raised; the error is still re-raised to the
    /// caller after being recorded here.
    pub error: Option<String>,
    /// Shallow JSON snapshot of `State` taken after the step ran.
    pub state_after: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_a_type_tag() {
        let ev = Event::RunEnd {
            step_id: "finalize".into(),
            remaining_inbox: 2,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "RunEnd");
        assert_eq!(json["remaining_inbox"], 2);
    }
}
